//! Control-side audio playback: owns the ring producer and the output graph.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, trace};

use crate::audio::render::{AudioRenderer, RenderControl};
use crate::audio::AudioFormat;
use crate::error::AudioError;
use crate::event::EventChannel;
use crate::ring::{Producer, RingBuffer};

/// Opens output graphs on some audio device API.
pub trait AudioBackend: Send {
    type Graph: OutputGraph;

    /// Build a graph that pulls samples from `renderer`. The graph starts
    /// paused.
    fn open(&mut self, format: &AudioFormat, renderer: AudioRenderer) -> Result<Self::Graph, AudioError>;
}

/// A live output graph. Dropping it releases every device resource.
pub trait OutputGraph: Send {
    fn play(&mut self) -> Result<(), AudioError>;

    fn pause(&mut self) -> Result<(), AudioError>;

    /// Base plus output latency of the device path.
    fn latency(&self) -> Duration;
}

struct LiveGraph<G> {
    format: AudioFormat,
    graph: G,
    producer: Producer<f32>,
    control: Arc<RenderControl>,
}

/// Control-side owner of the audio path.
///
/// Holds the producer end of the playback ring and the output graph that
/// drains the consumer end.
pub struct AudioPlaybackEngine<B: AudioBackend> {
    backend: B,
    live: Option<LiveGraph<B::Graph>>,
    rejected: Option<AudioFormat>,
    paused: bool,
    latency: EventChannel<Duration>,
}

impl<B: AudioBackend> AudioPlaybackEngine<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            live: None,
            rejected: None,
            paused: false,
            latency: EventChannel::new(),
        }
    }

    /// Make `format` the live configuration.
    ///
    /// Does nothing when the graph is already live with the same format.
    /// Otherwise the old graph is released and a fresh ring and graph are
    /// built. A format the backend rejected before is not retried.
    pub fn configure(&mut self, format: AudioFormat) -> Result<(), AudioError> {
        if self.live.as_ref().is_some_and(|live| live.format == format) {
            return Ok(());
        }
        if self.rejected == Some(format) {
            return Err(AudioError::UnsupportedFormat(format.to_string()));
        }

        let result = self.open(format);
        match &result {
            Ok(()) => self.rejected = None,
            Err(e) => {
                error!("audio setup for {format} failed: {e}");
                self.rejected = Some(format);
            }
        }
        result
    }

    fn open(&mut self, format: AudioFormat) -> Result<(), AudioError> {
        format.validate()?;
        self.close();

        let (producer, consumer) = RingBuffer::new(format.ring_slots()).split();
        let control = Arc::new(RenderControl::default());
        let renderer = AudioRenderer::new(consumer, format.channels as usize, Arc::clone(&control));

        let mut graph = self.backend.open(&format, renderer)?;
        if !self.paused {
            graph.play()?;
        }

        info!("audio output configured: {format}");
        self.live = Some(LiveGraph {
            format,
            graph,
            producer,
            control,
        });
        Ok(())
    }

    /// Push interleaved samples. Returns how many were accepted; the
    /// excess is dropped when the ring is full or no graph is live.
    ///
    /// Only whole frames are accepted so the ring never holds a split
    /// frame.
    pub fn queue(&mut self, samples: &[f32]) -> usize {
        let Some(live) = self.live.as_mut() else {
            return 0;
        };
        let channels = usize::from(live.format.channels);
        let fits = samples.len().min(live.producer.available_write());
        let written = live.producer.push(&samples[..fits - fits % channels]);
        if written < samples.len() {
            trace!("audio ring full, dropped {} samples", samples.len() - written);
        }
        written
    }

    /// Stop draining the ring. Remembered across reconfiguration.
    pub fn pause(&mut self) -> Result<(), AudioError> {
        self.paused = true;
        match self.live.as_mut() {
            Some(live) => live.graph.pause(),
            None => Ok(()),
        }
    }

    /// Resume draining. Stale buffered audio is discarded and pre-roll
    /// starts over.
    pub fn play(&mut self) -> Result<(), AudioError> {
        self.paused = false;
        match self.live.as_mut() {
            Some(live) => {
                live.control.request_discard();
                live.graph.play()
            }
            None => Ok(()),
        }
    }

    /// Release the graph and ring, keeping the paused preference. The
    /// next `configure` builds a fresh graph even for the same format.
    pub fn close(&mut self) {
        if let Some(live) = self.live.take() {
            debug!("releasing audio output ({})", live.format);
        }
    }

    /// Close and forget the configuration entirely.
    pub fn stop(&mut self) {
        self.close();
        self.rejected = None;
    }

    /// Device latency plus buffered audio, while a graph is live.
    pub fn latency_estimate(&self) -> Option<Duration> {
        let live = self.live.as_ref()?;
        let buffered = live.producer.available_read() as f64 / live.format.samples_per_sec();
        Some(live.graph.latency() + Duration::from_secs_f64(buffered))
    }

    /// Publish the current estimate on [`latency_events`] if the graph is
    /// live and playing. Meant to be called on a fixed interval.
    ///
    /// [`latency_events`]: Self::latency_events
    pub fn report_latency(&self) -> Option<Duration> {
        if self.paused {
            return None;
        }
        let estimate = self.latency_estimate()?;
        self.latency.emit(&estimate);
        Some(estimate)
    }

    pub fn latency_events(&self) -> &EventChannel<Duration> {
        &self.latency
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.live.as_ref().map(|live| live.format)
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn buffered(&self) -> usize {
        self.live
            .as_ref()
            .map_or(0, |live| live.producer.available_read())
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}
