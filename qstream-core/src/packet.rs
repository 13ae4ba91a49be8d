//! Wire packets exchanged with the streaming host.
//!
//! # Wire Protocol
//!
//! One WebSocket binary message carries exactly one bincode-encoded
//! [`Packet`]. The enum tag selects the variant, so frames are
//! self-describing and no extra length prefix is needed.
//!
//! ```text
//! Host   ──[VideoChunk]─────────────────────► Client   (Annex-B NAL unit)
//! Host   ──[AudioChunk]─────────────────────► Client   (interleaved f32 PCM)
//! Host   ──[Settings]───────────────────────► Client   (on connect)
//! Client ──[Settings]───────────────────────► Host     (user changed them)
//! Client ──[Input]──────────────────────────► Host     (every input tick)
//! ```

use bincode::Options;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Upper bound on a single encoded packet.
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_PACKET_SIZE as u64)
}

// ── Packet ────────────────────────────────────────────────────────

/// A single typed message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    VideoChunk(VideoChunk),
    AudioChunk(AudioChunk),
    Settings(Settings),
    Input(InputDelta),
}

/// Discriminant of a [`Packet`], for logging and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    VideoChunk,
    AudioChunk,
    Settings,
    Input,
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VideoChunk => write!(f, "video"),
            Self::AudioChunk => write!(f, "audio"),
            Self::Settings => write!(f, "settings"),
            Self::Input => write!(f, "input"),
        }
    }
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::VideoChunk(_) => PacketKind::VideoChunk,
            Self::AudioChunk(_) => PacketKind::AudioChunk,
            Self::Settings(_) => PacketKind::Settings,
            Self::Input(_) => PacketKind::Input,
        }
    }

    /// Serialize to a wire frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StreamError> {
        let bytes = bincode::DefaultOptions::new().serialize(self)?;
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(StreamError::PacketTooLarge {
                size: bytes.len(),
                max: MAX_PACKET_SIZE,
            });
        }
        Ok(bytes)
    }

    /// Deserialize a wire frame. Trailing bytes are rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StreamError> {
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(StreamError::PacketTooLarge {
                size: bytes.len(),
                max: MAX_PACKET_SIZE,
            });
        }
        Ok(wire_options().deserialize(bytes)?)
    }
}

// ── Video ─────────────────────────────────────────────────────────

/// One encoded H.264 NAL unit, start code included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoChunk {
    pub data: Bytes,
}

impl VideoChunk {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

// ── Audio ─────────────────────────────────────────────────────────

/// A block of interleaved PCM samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioChunk {
    pub sample_rate: u32,
    pub channels: u8,
    /// `[L0, R0, L1, R1, ...]` for stereo.
    pub samples: Vec<f32>,
}

impl AudioChunk {
    /// Number of whole frames in the block.
    pub fn frames(&self) -> usize {
        match self.channels {
            0 => 0,
            ch => self.samples.len() / ch as usize,
        }
    }
}

// ── Settings ──────────────────────────────────────────────────────

/// How microphone audio is mixed with game audio on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MicMix {
    Combine,
    #[default]
    Duck,
    Add,
}

/// Stream settings, sent by the host on connect and echoed back by the
/// client whenever the user changes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Output width in pixels.
    pub horizontal: i32,
    /// Output height in pixels.
    pub vertical: i32,
    /// Target bitrate in kbps.
    pub bitrate: i32,
    pub fps: f32,
    /// Field of view in degrees.
    pub fov: f32,
    pub smoothness: f32,
    pub mic: bool,
    /// First-person low-latency mode.
    pub fpfc: bool,
    pub game_volume: f32,
    pub mic_volume: f32,
    pub mic_threshold: f32,
    pub mic_mix: MicMix,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            horizontal: 1280,
            vertical: 720,
            bitrate: 10_000,
            fps: 30.0,
            fov: 80.0,
            smoothness: 1.0,
            mic: true,
            fpfc: false,
            game_volume: 1.0,
            mic_volume: 1.0,
            mic_threshold: 1.0,
            mic_mix: MicMix::Duck,
        }
    }
}

impl Settings {
    /// `(width, height)` of the encoded stream.
    pub fn resolution(&self) -> (i32, i32) {
        (self.horizontal, self.vertical)
    }

    /// True when a change from `other` requires the video pipeline to be
    /// reset (new resolution or frame rate).
    pub fn changes_video_format(&self, other: &Settings) -> bool {
        self.resolution() != other.resolution() || self.fps != other.fps
    }
}

// ── Input ─────────────────────────────────────────────────────────

/// Coalesced input since the last tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputDelta {
    pub dx: f32,
    /// Positive is up.
    pub dy: f32,
    pub mouse_down: bool,
    pub mouse_up: bool,
    pub keys_down: Vec<String>,
    pub keys_up: Vec<String>,
    pub scroll: f32,
}

impl InputDelta {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_roundtrip() {
        let settings = Settings {
            fpfc: true,
            fps: 60.0,
            ..Settings::default()
        };
        let packet = Packet::Settings(settings.clone());
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(Packet::from_bytes(&bytes).unwrap(), Packet::Settings(settings));
    }

    #[test]
    fn audio_chunk_roundtrip_keeps_samples() {
        let chunk = AudioChunk {
            sample_rate: 48_000,
            channels: 2,
            samples: vec![0.25, -0.25, 0.5, -0.5],
        };
        assert_eq!(chunk.frames(), 2);
        let bytes = Packet::AudioChunk(chunk.clone()).to_bytes().unwrap();
        match Packet::from_bytes(&bytes).unwrap() {
            Packet::AudioChunk(decoded) => assert_eq!(decoded, chunk),
            other => panic!("expected audio, got {:?}", other.kind()),
        }
    }

    #[test]
    fn video_chunk_keeps_bytes() {
        let chunk = VideoChunk::new(vec![0, 0, 0, 1, 0x65, 0xAA]);
        let bytes = Packet::VideoChunk(chunk.clone()).to_bytes().unwrap();
        let decoded = Packet::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.kind(), PacketKind::VideoChunk);
        assert_eq!(decoded, Packet::VideoChunk(chunk));
    }

    #[test]
    fn rejects_unknown_variant() {
        assert!(Packet::from_bytes(&[9, 0, 0]).is_err());
    }

    #[test]
    fn rejects_empty_and_truncated() {
        assert!(Packet::from_bytes(&[]).is_err());

        let bytes = Packet::Input(InputDelta {
            keys_down: vec!["KeyW".into()],
            ..Default::default()
        })
        .to_bytes()
        .unwrap();
        assert!(Packet::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = Packet::Input(InputDelta::default()).to_bytes().unwrap();
        bytes.push(0);
        assert!(Packet::from_bytes(&bytes).is_err());
    }

    #[test]
    fn input_delta_emptiness() {
        assert!(InputDelta::default().is_empty());
        let delta = InputDelta {
            scroll: -1.0,
            ..Default::default()
        };
        assert!(!delta.is_empty());
    }

    #[test]
    fn video_format_change_detection() {
        let base = Settings::default();
        let louder = Settings {
            game_volume: 0.5,
            ..base.clone()
        };
        assert!(!base.changes_video_format(&louder));

        let faster = Settings {
            fps: 60.0,
            ..base.clone()
        };
        assert!(base.changes_video_format(&faster));
    }
}
