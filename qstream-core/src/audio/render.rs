//! Render-side half of audio playback: pre-roll gate and channel split.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::ring::Consumer;

/// Requests posted from the control context to the render context.
#[derive(Debug, Default)]
pub(crate) struct RenderControl {
    discard: AtomicBool,
}

impl RenderControl {
    /// Ask the renderer to drop everything buffered and pre-roll again on
    /// its next cycle.
    pub(crate) fn request_discard(&self) {
        self.discard.store(true, Ordering::Release);
    }
}

/// Consumer side of the playback ring, driven by the output graph.
///
/// Withholds output until the ring is more than half full (pre-roll),
/// then drains it every cycle. Every method is allocation-free and never
/// blocks; underruns are filled with silence.
pub struct AudioRenderer {
    consumer: Consumer<f32>,
    channels: usize,
    scratch: Box<[f32]>,
    preroll: usize,
    primed: bool,
    control: Arc<RenderControl>,
}

impl AudioRenderer {
    pub(crate) fn new(consumer: Consumer<f32>, channels: usize, control: Arc<RenderControl>) -> Self {
        let slots = consumer.capacity() + 1;
        Self {
            scratch: vec![0.0; consumer.capacity()].into_boxed_slice(),
            consumer,
            channels,
            preroll: slots / 2,
            primed: false,
            control,
        }
    }

    /// Interleaved channel count of the stream.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Whether pre-roll has completed.
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    /// Samples waiting in the ring.
    pub fn buffered(&self) -> usize {
        self.consumer.available_read()
    }

    /// Fill one planar buffer per channel. Returns the number of samples
    /// taken from the ring; the rest of every buffer is silence.
    pub fn render_planar(&mut self, outputs: &mut [&mut [f32]]) -> usize {
        let frames = outputs.iter().map(|o| o.len()).min().unwrap_or(0);
        if !self.begin_cycle() {
            for out in outputs.iter_mut() {
                out.fill(0.0);
            }
            return 0;
        }

        let channels = outputs.len().max(1);
        let wanted = (frames * channels).min(self.scratch.len());
        let wanted = wanted - wanted % channels;
        let read = self.consumer.pop(&mut self.scratch[..wanted]);
        deinterleave(&self.scratch[..read], outputs);
        read
    }

    /// Fill an interleaved device buffer whose channel layout matches the
    /// stream. Returns the number of samples taken from the ring.
    pub fn render_interleaved(&mut self, out: &mut [f32]) -> usize {
        if !self.begin_cycle() {
            out.fill(0.0);
            return 0;
        }
        let whole = out.len() - out.len() % self.channels.max(1);
        let read = self.consumer.pop(&mut out[..whole]);
        out[read..].fill(0.0);
        read
    }

    /// Service control requests and the pre-roll gate. Returns `true` when
    /// this cycle should drain the ring.
    fn begin_cycle(&mut self) -> bool {
        if self.control.discard.swap(false, Ordering::AcqRel) {
            self.consumer.clear();
            self.primed = false;
        }
        if !self.primed && self.consumer.available_read() > self.preroll {
            self.primed = true;
        }
        self.primed
    }
}

/// Split `[L0, R0, L1, R1, ...]` into one buffer per channel.
///
/// Output buffers past the end of `input` are filled with silence. A
/// trailing partial frame is written as far as it goes.
pub fn deinterleave(input: &[f32], outputs: &mut [&mut [f32]]) {
    let channels = outputs.len();
    if channels == 0 {
        return;
    }
    let frames = outputs.iter().map(|o| o.len()).min().unwrap_or(0);
    let total = frames * channels;

    for (idx, sample) in input.iter().take(total).enumerate() {
        outputs[idx % channels][idx / channels] = *sample;
    }
    for idx in input.len().min(total)..total {
        outputs[idx % channels][idx / channels] = 0.0;
    }
}
