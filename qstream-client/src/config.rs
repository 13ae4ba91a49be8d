//! Client configuration.

use std::path::Path;
use std::time::Duration;

use qstream_core::network::DEFAULT_PORT;
use qstream_core::{Address, ParameterSetPolicy, SchedulerConfig, SessionConfig, StreamClientConfig};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the stream client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub network: NetworkConfig,
    pub video: VideoConfig,
    pub audio: AudioConfig,
    pub input: InputConfig,
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host name or IP of the streaming host.
    pub address: String,
    pub port: u16,
    /// Connect as soon as the client starts.
    pub auto_connect: bool,
    /// WebSocket handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Delay before each reconnection attempt, in milliseconds.
    pub retry_delay_ms: u64,
}

/// Video settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// `combine_with_key` or `standalone`.
    pub parameter_sets: ParameterSetPolicy,
    /// Write the released Annex-B stream here. Empty disables recording.
    pub record_path: String,
}

/// Where decoded audio goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioOutput {
    /// Drained on a timer and discarded.
    Headless,
    /// Default output device (requires the `cpal` feature).
    Device,
}

/// Audio settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub output: AudioOutput,
    /// Playback buffer in first-person mode, seconds.
    pub low_latency_buffer_secs: f64,
    /// Playback buffer otherwise, seconds.
    pub buffer_secs: f64,
    pub latency_report_ms: u64,
}

/// Input forwarding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Input packets per second.
    pub tick_hz: u32,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG`.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: "192.168.0.1".into(),
            port: DEFAULT_PORT,
            auto_connect: true,
            connect_timeout_ms: 5000,
            retry_delay_ms: 2000,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            parameter_sets: ParameterSetPolicy::default(),
            record_path: String::new(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        let client = StreamClientConfig::default();
        Self {
            output: AudioOutput::Headless,
            low_latency_buffer_secs: client.low_latency_buffer_secs,
            buffer_secs: client.buffer_secs,
            latency_report_ms: client.latency_report_interval.as_millis() as u64,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { tick_hz: 60 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Replace host and port with a `host[:port]` string.
    pub fn override_address(&mut self, address: &str) -> Result<(), qstream_core::StreamError> {
        let address: Address = address.parse()?;
        self.network.address = address.host().to_string();
        self.network.port = address.port();
        Ok(())
    }

    // ── Derived settings ─────────────────────────────────────────

    pub fn address(&self) -> Address {
        Address::new(self.network.address.clone(), self.network.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.network.connect_timeout_ms)
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            retry_delay: Duration::from_millis(self.network.retry_delay_ms),
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            policy: self.video.parameter_sets,
            ..SchedulerConfig::default()
        }
    }

    pub fn stream_client(&self) -> StreamClientConfig {
        StreamClientConfig {
            low_latency_buffer_secs: self.audio.low_latency_buffer_secs,
            buffer_secs: self.audio.buffer_secs,
            latency_report_interval: Duration::from_millis(self.audio.latency_report_ms.max(1)),
        }
    }

    /// Input tick period; rates of 0 fall back to 60 Hz.
    pub fn input_tick(&self) -> Duration {
        let hz = if self.input.tick_hz == 0 { 60 } else { self.input.tick_hz };
        Duration::from_nanos(1_000_000_000 / u64::from(hz))
    }
}

// ── Tests ────────────────────────────────────────────────────────
