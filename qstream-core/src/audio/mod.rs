//! Audio playback: PCM from the session flows through a [`RingBuffer`]
//! into an output graph that drains it on its own real-time schedule.
//!
//! ```text
//!  control context                     render context
//!  AudioPlaybackEngine::queue ──► Producer ═══ ring ═══ Consumer ──► AudioRenderer ──► device
//! ```
//!
//! [`RingBuffer`]: crate::ring::RingBuffer

mod engine;
mod render;

pub use engine::{AudioBackend, AudioPlaybackEngine, OutputGraph};
pub use render::{AudioRenderer, deinterleave};

use crate::error::AudioError;

/// Audio buffer time used in first-person low-latency mode.
pub const LOW_LATENCY_BUFFER_SECS: f64 = 0.2;

/// Audio buffer time used otherwise.
pub const DEFAULT_BUFFER_SECS: f64 = 2.0;

/// Highest sample rate accepted from a host.
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Highest interleaved channel count accepted from a host (7.1).
pub const MAX_CHANNELS: u8 = 8;

/// Largest playback ring, in samples (64 MiB of `f32`).
pub const MAX_RING_SLOTS: usize = 1 << 24;

/// Shape of the PCM stream and how much of it may be buffered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u8,
    pub buffer_time_secs: f64,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u8, buffer_time_secs: f64) -> Self {
        Self {
            sample_rate,
            channels,
            buffer_time_secs,
        }
    }

    /// Interleaved samples per second.
    pub fn samples_per_sec(&self) -> f64 {
        self.sample_rate as f64 * self.channels as f64
    }

    /// Ring slots needed to hold `buffer_time_secs` of audio.
    pub fn ring_slots(&self) -> usize {
        (self.samples_per_sec() * self.buffer_time_secs).round() as usize
    }

    pub fn validate(&self) -> Result<(), AudioError> {
        if self.sample_rate == 0 {
            return Err(AudioError::UnsupportedFormat("sample rate is zero".into()));
        }
        if self.sample_rate > MAX_SAMPLE_RATE {
            return Err(AudioError::UnsupportedFormat(format!(
                "sample rate {} Hz above {MAX_SAMPLE_RATE} Hz",
                self.sample_rate
            )));
        }
        if self.channels == 0 {
            return Err(AudioError::UnsupportedFormat("no channels".into()));
        }
        if self.channels > MAX_CHANNELS {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} channels, at most {MAX_CHANNELS}",
                self.channels
            )));
        }
        if !self.buffer_time_secs.is_finite() || self.buffer_time_secs <= 0.0 {
            return Err(AudioError::UnsupportedFormat(format!(
                "buffer time {}s",
                self.buffer_time_secs
            )));
        }
        if self.ring_slots() < 2 {
            return Err(AudioError::UnsupportedFormat(
                "buffer holds less than one sample".into(),
            ));
        }
        if self.ring_slots() > MAX_RING_SLOTS {
            return Err(AudioError::UnsupportedFormat(format!(
                "{}s buffer needs {} slots",
                self.buffer_time_secs,
                self.ring_slots()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz x{} ({}s buffer)",
            self.sample_rate, self.channels, self.buffer_time_secs
        )
    }
}
