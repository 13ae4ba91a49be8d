//! Stream client: wires one transport session to the video feed, the audio
//! engine and input capture.
//!
//! The client task is the dispatcher for inbound packets. It owns the
//! [`AudioPlaybackEngine`] outright; the video feed and input capture run
//! in their own tasks and are reached through their handles.
//!
//! ```text
//!  TransportSession ──packet/disconnected──► dispatcher ──► VideoFeed
//!          ▲                                     │
//!          │                                     └────────► AudioPlaybackEngine
//!          └──────────── InputCapture (tick)
//! ```

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::audio::{AudioBackend, AudioFormat, AudioPlaybackEngine, DEFAULT_BUFFER_SECS, LOW_LATENCY_BUFFER_SECS};
use crate::error::AudioError;
use crate::event::SubscriptionId;
use crate::input::InputCapture;
use crate::network::{Address, TransportSession};
use crate::packet::{AudioChunk, Packet, Settings};
use crate::video::VideoFeed;

/// Interval between audio latency reports.
pub const LATENCY_REPORT_INTERVAL: Duration = Duration::from_millis(500);

/// Tunables for a [`StreamClient`].
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// Audio buffer time while the host runs in first-person mode.
    pub low_latency_buffer_secs: f64,
    /// Audio buffer time otherwise.
    pub buffer_secs: f64,
    pub latency_report_interval: Duration,
}

impl Default for StreamClientConfig {
    fn default() -> Self {
        Self {
            low_latency_buffer_secs: LOW_LATENCY_BUFFER_SECS,
            buffer_secs: DEFAULT_BUFFER_SECS,
            latency_report_interval: LATENCY_REPORT_INTERVAL,
        }
    }
}

#[derive(Debug)]
enum ClientMessage {
    Packet(Packet),
    Disconnected,
    UpdateSettings(Settings),
    PauseAudio,
    PlayAudio,
    StopAudio,
}

/// Handle to a running stream client.
pub struct StreamClient {
    session: TransportSession,
    video: VideoFeed,
    input: InputCapture,
    tx: mpsc::UnboundedSender<ClientMessage>,
    settings: watch::Receiver<Option<Settings>>,
    audio_latency: watch::Receiver<Option<Duration>>,
    packet_subscription: SubscriptionId,
    disconnect_subscription: SubscriptionId,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StreamClient {
    /// Subscribe to `session` and start the dispatcher task.
    pub fn spawn<B>(
        session: TransportSession,
        video: VideoFeed,
        input: InputCapture,
        backend: B,
        config: StreamClientConfig,
    ) -> Self
    where
        B: AudioBackend + 'static,
        B::Graph: 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (settings_tx, settings) = watch::channel(None);
        let (latency_tx, audio_latency) = watch::channel(None);

        let packet_tx = tx.clone();
        let packet_subscription = session.events().packet.subscribe(move |packet: &Packet| {
            let _ = packet_tx.send(ClientMessage::Packet(packet.clone()));
        });
        let disconnect_tx = tx.clone();
        let disconnect_subscription = session.events().disconnected.subscribe(move |_| {
            let _ = disconnect_tx.send(ClientMessage::Disconnected);
        });

        let shutdown = CancellationToken::new();
        let dispatcher = Dispatcher {
            session: session.clone(),
            video: video.clone(),
            audio: AudioPlaybackEngine::new(backend),
            config,
            settings: None,
            settings_tx,
            latency_tx,
        };
        let task = tokio::spawn(dispatcher.run(rx, shutdown.clone()));

        Self {
            session,
            video,
            input,
            tx,
            settings,
            audio_latency,
            packet_subscription,
            disconnect_subscription,
            shutdown,
            task: Some(task),
        }
    }

    pub fn connect(&self, address: Address) {
        self.session.connect(address);
    }

    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    pub fn session(&self) -> &TransportSession {
        &self.session
    }

    pub fn video(&self) -> &VideoFeed {
        &self.video
    }

    pub fn input(&self) -> &InputCapture {
        &self.input
    }

    /// Settings last received from (or sent to) the host on this
    /// connection.
    pub fn settings(&self) -> Option<Settings> {
        self.settings.borrow().clone()
    }

    pub fn watch_settings(&self) -> watch::Receiver<Option<Settings>> {
        self.settings.clone()
    }

    /// Latest audio latency report.
    pub fn audio_latency(&self) -> Option<Duration> {
        *self.audio_latency.borrow()
    }

    pub fn watch_audio_latency(&self) -> watch::Receiver<Option<Duration>> {
        self.audio_latency.clone()
    }

    /// Apply new settings locally and send them to the host. Ignored until
    /// the host has sent its own settings on this connection.
    pub fn update_settings(&self, settings: Settings) {
        self.post(ClientMessage::UpdateSettings(settings));
    }

    pub fn pause_audio(&self) {
        self.post(ClientMessage::PauseAudio);
    }

    pub fn play_audio(&self) {
        self.post(ClientMessage::PlayAudio);
    }

    pub fn stop_audio(&self) {
        self.post(ClientMessage::StopAudio);
    }

    /// Detach from the session and wait for the dispatcher to release the
    /// audio output.
    pub async fn shutdown(mut self) {
        self.detach();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn detach(&self) {
        let events = self.session.events();
        events.packet.unsubscribe(self.packet_subscription);
        events.disconnected.unsubscribe(self.disconnect_subscription);
        self.shutdown.cancel();
    }

    fn post(&self, message: ClientMessage) {
        if self.tx.send(message).is_err() {
            debug!("stream client task has stopped");
        }
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.detach();
    }
}

// ── Dispatcher ────────────────────────────────────────────────────

struct Dispatcher<B: AudioBackend> {
    session: TransportSession,
    video: VideoFeed,
    audio: AudioPlaybackEngine<B>,
    config: StreamClientConfig,
    settings: Option<Settings>,
    settings_tx: watch::Sender<Option<Settings>>,
    latency_tx: watch::Sender<Option<Duration>>,
}

impl<B: AudioBackend> Dispatcher<B> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ClientMessage>, shutdown: CancellationToken) {
        let mut report = tokio::time::interval(self.config.latency_report_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
                _ = report.tick() => self.report_latency(),
            }
        }

        self.audio.stop();
        debug!("stream client stopped");
    }

    fn handle(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Packet(Packet::VideoChunk(chunk)) => self.video.push_chunk(chunk.data),
            ClientMessage::Packet(Packet::AudioChunk(chunk)) => self.on_audio(chunk),
            ClientMessage::Packet(Packet::Settings(settings)) => {
                info!(
                    "host settings: {}x{} @ {} fps, fpfc {}",
                    settings.horizontal, settings.vertical, settings.fps, settings.fpfc
                );
                self.apply_settings(settings);
            }
            ClientMessage::Packet(Packet::Input(_)) => trace!("ignoring input packet from host"),
            ClientMessage::Disconnected => self.on_disconnected(),
            ClientMessage::UpdateSettings(settings) => {
                if self.settings.is_none() {
                    debug!("no host settings yet; not sending update");
                    return;
                }
                self.apply_settings(settings.clone());
                self.session.send(Packet::Settings(settings));
            }
            ClientMessage::PauseAudio => self.audio_control("pause", |audio| audio.pause()),
            ClientMessage::PlayAudio => self.audio_control("play", |audio| audio.play()),
            ClientMessage::StopAudio => self.audio.stop(),
        }
    }

    fn fpfc(&self) -> bool {
        self.settings.as_ref().is_some_and(|s| s.fpfc)
    }

    fn on_audio(&mut self, chunk: AudioChunk) {
        let buffer_secs = if self.fpfc() {
            self.config.low_latency_buffer_secs
        } else {
            self.config.buffer_secs
        };
        let format = AudioFormat::new(chunk.sample_rate, chunk.channels, buffer_secs);
        // Failures are logged by the engine; video carries on without audio.
        if self.audio.configure(format).is_ok() {
            self.audio.queue(&chunk.samples);
        }
    }

    fn apply_settings(&mut self, settings: Settings) {
        let reset_video = self
            .settings
            .as_ref()
            .is_none_or(|old| old.changes_video_format(&settings));
        let fpfc_on = settings.fpfc && !self.fpfc();

        self.video.set_frame_rate(settings.fps as f64);
        if reset_video {
            self.video.flush();
        }
        if fpfc_on {
            self.video.set_latency_target(0.0);
        }
        self.settings_tx.send_replace(Some(settings.clone()));
        self.settings = Some(settings);
    }

    fn audio_control(
        &mut self,
        action: &str,
        f: impl FnOnce(&mut AudioPlaybackEngine<B>) -> Result<(), AudioError>,
    ) {
        if let Err(e) = f(&mut self.audio) {
            warn!("audio {action} failed: {e}");
        }
    }

    fn report_latency(&mut self) {
        let Some(latency) = self.audio.report_latency() else {
            return;
        };
        self.latency_tx.send_replace(Some(latency));
        let target = if self.fpfc() { 0.0 } else { latency.as_secs_f64() };
        self.video.set_latency_target(target);
    }

    fn on_disconnected(&mut self) {
        self.audio.close();
        self.video.flush();
        self.settings = None;
        self.settings_tx.send_replace(None);
        self.latency_tx.send_replace(None);
    }
}
