//! qstream client entry point.
//!
//! ```text
//! qstream-client                        Connect with defaults
//! qstream-client --config <path>        Use custom config TOML
//! qstream-client --address host:port    Override the host address
//! qstream-client --record out.h264      Write the video stream to a file
//! qstream-client --gen-config           Dump default config and exit
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use qstream_core::{
    AudioBackend, InputCapture, StreamClient, TransportSession, VideoFeed, WebSocketConnector,
};
use qstream_client::config::{AudioOutput, ClientConfig};
use qstream_client::output::HeadlessBackend;
use qstream_client::recorder::{AnnexBRecorder, open_output};

/// Interval between status lines.
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "qstream-client", about = "Real-time stream client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "qstream-client.toml")]
    config: PathBuf,

    /// Host address (overrides config). Example: 192.168.0.1:3308
    #[arg(short, long)]
    address: Option<String>,

    /// Record the Annex-B video stream to this file (overrides config).
    #[arg(short, long)]
    record: Option<PathBuf>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ClientConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ClientConfig::load(&cli.config);
    if let Some(address) = &cli.address {
        config.override_address(address)?;
    }
    if let Some(path) = &cli.record {
        config.video.record_path = path.display().to_string();
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("qstream-client v{}", env!("CARGO_PKG_VERSION"));

    match config.audio.output {
        AudioOutput::Headless => run(config, HeadlessBackend::default()).await,
        #[cfg(feature = "cpal")]
        AudioOutput::Device => run(config, qstream_client::output::CpalBackend).await,
        #[cfg(not(feature = "cpal"))]
        AudioOutput::Device => {
            warn!("built without the `cpal` feature; using headless audio output");
            run(config, HeadlessBackend::default()).await
        }
    }
}

async fn run<B>(config: ClientConfig, backend: B) -> Result<(), Box<dyn std::error::Error>>
where
    B: AudioBackend + 'static,
    B::Graph: 'static,
{
    // ── 1. Transport ────────────────────────────────────────────

    let session = TransportSession::spawn(
        WebSocketConnector::new(config.connect_timeout()),
        config.session(),
    );
    let events = session.events();
    events.connected.subscribe(|address| info!("connected to {address}"));
    events.disconnected.subscribe(|_| info!("disconnected"));
    events.error.subscribe(|e| warn!("connection error: {e}"));
    events.state_changed.subscribe(|state| debug!("connection state: {state}"));

    // ── 2. Media pipeline ───────────────────────────────────────

    let record_path = (!config.video.record_path.is_empty()).then(|| PathBuf::from(&config.video.record_path));
    let output = open_output(record_path.as_deref())?;
    let (video, feed_task) = VideoFeed::spawn(config.scheduler(), |signal| AnnexBRecorder::new(output, signal));
    let (input, capture_task) = InputCapture::spawn(session.clone(), config.input_tick());

    let client = StreamClient::spawn(session.clone(), video, input, backend, config.stream_client());

    if config.network.auto_connect {
        info!("connecting to {}", config.address());
        client.connect(config.address());
    } else {
        info!("auto_connect is off; idle until interrupted");
    }

    // ── 3. Run until interrupted ────────────────────────────────

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = status.tick() => {
                let stats = client.video().stats();
                let latency = client
                    .audio_latency()
                    .map_or_else(|| "n/a".to_string(), |l| format!("{} ms", l.as_millis()));
                info!(
                    "{}: video {}/{} released, {} pending, {} dropped; audio latency {latency}",
                    session.state(),
                    stats.released,
                    stats.received,
                    stats.pending,
                    stats.dropped,
                );
            }
        }
    }

    // ── 4. Shutdown ─────────────────────────────────────────────

    info!("shutting down");
    client.disconnect();
    client.shutdown().await;
    // Both tasks end once the client's handles are gone; the recorder
    // flushes when the feed task drops it.
    let _ = tokio::join!(capture_task, feed_task);

    Ok(())
}
