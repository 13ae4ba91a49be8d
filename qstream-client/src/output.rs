//! Audio output graphs.
//!
//! Each graph owns a render thread that drives an [`AudioRenderer`].
//! The control side talks to it over a `crossbeam-channel`; dropping the
//! graph stops and joins the thread.
//!
//! * [`HeadlessBackend`]: pulls one period of audio on a fixed clock and
//!   throws it away. Keeps the ring draining on machines without a sound
//!   device.
//! * `CpalBackend` (feature `cpal`): plays through the default output
//!   device.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, select, tick};
use qstream_core::{AudioBackend, AudioError, AudioFormat, AudioRenderer, OutputGraph};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GraphCommand {
    Play,
    Pause,
}

/// Control end of a render thread.
pub struct ThreadGraph {
    commands: Option<Sender<GraphCommand>>,
    thread: Option<JoinHandle<()>>,
    latency: LatencyProbe,
}

impl ThreadGraph {
    fn send(&self, command: GraphCommand) -> Result<(), AudioError> {
        match &self.commands {
            Some(tx) => tx
                .send(command)
                .map_err(|_| AudioError::Backend("render thread has exited".into())),
            None => Ok(()),
        }
    }
}

impl OutputGraph for ThreadGraph {
    fn play(&mut self) -> Result<(), AudioError> {
        self.send(GraphCommand::Play)
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        self.send(GraphCommand::Pause)
    }

    fn latency(&self) -> Duration {
        self.latency.get()
    }
}

impl Drop for ThreadGraph {
    fn drop(&mut self) {
        // Disconnecting the channel stops the thread.
        self.commands.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("audio render thread panicked");
            }
        }
    }
}

/// Device latency shared between the render thread and the control side.
#[derive(Debug, Clone, Default)]
struct LatencyProbe(Arc<AtomicU64>);

impl LatencyProbe {
    fn set(&self, latency: Duration) {
        self.0.store(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    fn get(&self) -> Duration {
        Duration::from_nanos(self.0.load(Ordering::Relaxed))
    }
}

// ── Headless ─────────────────────────────────────────────────────

/// Drains the ring on a timer.
#[derive(Debug, Clone)]
pub struct HeadlessBackend {
    period: Duration,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(Duration::from_millis(10))
    }
}

impl HeadlessBackend {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl AudioBackend for HeadlessBackend {
    type Graph = ThreadGraph;

    fn open(&mut self, format: &AudioFormat, renderer: AudioRenderer) -> Result<ThreadGraph, AudioError> {
        let frames = (f64::from(format.sample_rate) * self.period.as_secs_f64()).ceil() as usize;
        let period = self.period;
        let (tx, rx) = bounded(8);
        let latency = LatencyProbe::default();
        latency.set(period);

        let thread = thread::Builder::new()
            .name("audio-headless".into())
            .spawn(move || headless_loop(renderer, rx, period, frames.max(1)))
            .map_err(|e| AudioError::Backend(e.to_string()))?;

        Ok(ThreadGraph {
            commands: Some(tx),
            thread: Some(thread),
            latency,
        })
    }
}

fn headless_loop(mut renderer: AudioRenderer, commands: Receiver<GraphCommand>, period: Duration, frames: usize) {
    let mut buffer = vec![0.0f32; frames * renderer.channels()];
    let clock = tick(period);
    let mut playing = false;

    loop {
        select! {
            recv(commands) -> command => match command {
                Ok(GraphCommand::Play) => playing = true,
                Ok(GraphCommand::Pause) => playing = false,
                Err(_) => break,
            },
            recv(clock) -> _ => {
                if playing {
                    let read = renderer.render_interleaved(&mut buffer);
                    trace!("headless render: {read} samples");
                }
            }
        }
    }
    debug!("headless audio graph stopped");
}

// ── cpal ─────────────────────────────────────────────────────────

#[cfg(feature = "cpal")]
pub use device::CpalBackend;

#[cfg(feature = "cpal")]
mod device {
    use std::thread;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use crossbeam_channel::{Receiver, Sender, bounded};
    use qstream_core::{AudioBackend, AudioError, AudioFormat, AudioRenderer};
    use tracing::{debug, error, info};

    use super::{GraphCommand, LatencyProbe, ThreadGraph};

    /// Plays through the default output device of the default host.
    ///
    /// `cpal` streams cannot cross threads on every platform, so the stream
    /// is built and owned by the render thread.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct CpalBackend;

    impl AudioBackend for CpalBackend {
        type Graph = ThreadGraph;

        fn open(&mut self, format: &AudioFormat, renderer: AudioRenderer) -> Result<ThreadGraph, AudioError> {
            let (tx, rx) = bounded(8);
            let (ready_tx, ready_rx) = bounded(1);
            let latency = LatencyProbe::default();
            let format = *format;
            let probe = latency.clone();

            let thread = thread::Builder::new()
                .name("audio-cpal".into())
                .spawn(move || device_thread(format, renderer, rx, ready_tx, probe))
                .map_err(|e| AudioError::Backend(e.to_string()))?;

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(ThreadGraph {
                    commands: Some(tx),
                    thread: Some(thread),
                    latency,
                }),
                Ok(Err(e)) => {
                    let _ = thread.join();
                    Err(e)
                }
                Err(_) => {
                    let _ = thread.join();
                    Err(AudioError::Backend("audio thread exited during setup".into()))
                }
            }
        }
    }

    fn device_thread(
        format: AudioFormat,
        mut renderer: AudioRenderer,
        commands: Receiver<GraphCommand>,
        ready: Sender<Result<(), AudioError>>,
        latency: LatencyProbe,
    ) {
        let stream = match build_stream(&format, latency, move |out| {
            renderer.render_interleaved(out);
        }) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        if ready.send(Ok(())).is_err() {
            return;
        }

        while let Ok(command) = commands.recv() {
            let result = match command {
                GraphCommand::Play => stream.play(),
                GraphCommand::Pause => stream.pause(),
            };
            if let Err(e) = result {
                error!("audio device {command:?} failed: {e}");
            }
        }
        debug!("audio device released");
    }

    fn build_stream(
        format: &AudioFormat,
        latency: LatencyProbe,
        mut render: impl FnMut(&mut [f32]) + Send + 'static,
    ) -> Result<cpal::Stream, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::NoDevice("no default output device".into()))?;
        let name = device.name().unwrap_or_else(|_| "unknown".into());

        let config = cpal::StreamConfig {
            channels: u16::from(format.channels),
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                    let ts = info.timestamp();
                    if let Some(ahead) = ts.playback.duration_since(&ts.callback) {
                        latency.set(ahead);
                    }
                    render(data);
                },
                |err| error!("audio output stream error: {err}"),
                None,
            )
            .map_err(|e| AudioError::UnsupportedFormat(format!("{format} on {name}: {e}")))?;

        // Streams may start running as soon as they are built.
        stream
            .pause()
            .map_err(|e| AudioError::Backend(e.to_string()))?;
        info!("audio device: {name}");
        Ok(stream)
    }
}
