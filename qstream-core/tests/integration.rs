//! Integration tests: session lifecycle and reconnection over an
//! in-memory connector, packet round-trips over a real WebSocket on
//! localhost, and the full client pipeline.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use qstream_core::network::{FrameSink, FrameStream};
use qstream_core::{
    Address, AudioBackend, AudioChunk, AudioError, AudioFormat, AudioRenderer, ConnectionState,
    Connector, DecoderError, EncodedChunk, InputCapture, InputDelta, InputEvent, OutputGraph,
    Packet, ParameterSetPolicy, SchedulerConfig, SessionConfig, Settings, StreamClient,
    StreamClientConfig, StreamError, TransportSession, VideoChunk, VideoDecoder, VideoFeed,
    WebSocketConnector,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

// ── Helpers ──────────────────────────────────────────────────────

const TIMEOUT: Duration = Duration::from_secs(5);

/// Spin up a listener on an OS-assigned port and return its address.
async fn ephemeral_listener() -> (TcpListener, Address) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, Address::new(addr.ip().to_string(), addr.port()))
}

/// Poll `cond` until it holds or the timeout expires.
async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_for_state(session: &TransportSession, state: ConnectionState) {
    let mut status = session.watch_status();
    tokio::time::timeout(TIMEOUT, status.wait_for(|s| s.state == state))
        .await
        .expect("timeout")
        .expect("session gone");
}

/// Everything a session emitted, in order.
#[derive(Default)]
struct EventLog {
    states: Mutex<Vec<ConnectionState>>,
    connected: AtomicUsize,
    disconnected: AtomicUsize,
    errors: AtomicUsize,
}

impl EventLog {
    fn record(session: &TransportSession) -> Arc<Self> {
        let log = Arc::new(Self::default());
        let events = session.events();

        let l = log.clone();
        events.state_changed.subscribe(move |s| l.states.lock().push(*s));
        let l = log.clone();
        events.connected.subscribe(move |_| {
            l.connected.fetch_add(1, Ordering::SeqCst);
        });
        let l = log.clone();
        events.disconnected.subscribe(move |_| {
            l.disconnected.fetch_add(1, Ordering::SeqCst);
        });
        let l = log.clone();
        events.error.subscribe(move |_| {
            l.errors.fetch_add(1, Ordering::SeqCst);
        });
        log
    }

    fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().clone()
    }
}

/// Forward every received packet into a channel.
fn packet_channel(session: &TransportSession) -> mpsc::UnboundedReceiver<Packet> {
    let (tx, rx) = mpsc::unbounded_channel();
    session.events().packet.subscribe(move |p| {
        let _ = tx.send(p.clone());
    });
    rx
}

// ── In-memory connector ──────────────────────────────────────────

/// Host end of an in-memory link. Dropping it closes the link.
struct MockServer {
    to_client: fmpsc::UnboundedSender<Result<Vec<u8>, StreamError>>,
    from_client: fmpsc::UnboundedReceiver<Vec<u8>>,
}

impl MockServer {
    fn send(&self, packet: &Packet) {
        self.to_client
            .unbounded_send(Ok(packet.to_bytes().unwrap()))
            .unwrap();
    }

    async fn recv(&mut self) -> Packet {
        let frame = tokio::time::timeout(TIMEOUT, self.from_client.next())
            .await
            .expect("timeout")
            .expect("link closed");
        Packet::from_bytes(&frame).unwrap()
    }
}

struct MockInner {
    attempts: AtomicUsize,
    fail: AtomicBool,
    servers: mpsc::UnboundedSender<MockServer>,
}

#[derive(Clone)]
struct MockConnector {
    inner: Arc<MockInner>,
}

impl MockConnector {
    fn new() -> (Self, mpsc::UnboundedReceiver<MockServer>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(MockInner {
            attempts: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            servers,
        });
        (Self { inner }, rx)
    }

    fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    fn set_failing(&self, fail: bool) {
        self.inner.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _address: &Address) -> Result<(FrameSink, FrameStream), StreamError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into());
        }
        let (to_client, client_rx) = fmpsc::unbounded();
        let (client_tx, from_client) = fmpsc::unbounded();
        let _ = self.inner.servers.send(MockServer {
            to_client,
            from_client,
        });
        let sink = client_tx.sink_map_err(|_| StreamError::ChannelClosed);
        Ok((Box::pin(sink), Box::pin(client_rx)))
    }
}

async fn next_server(servers: &mut mpsc::UnboundedReceiver<MockServer>) -> MockServer {
    tokio::time::timeout(TIMEOUT, servers.recv())
        .await
        .expect("timeout")
        .expect("connector gone")
}

fn mock_session(retry_ms: u64) -> (TransportSession, MockConnector, mpsc::UnboundedReceiver<MockServer>) {
    let (connector, servers) = MockConnector::new();
    let session = TransportSession::spawn(
        connector.clone(),
        SessionConfig {
            retry_delay: Duration::from_millis(retry_ms),
        },
    );
    (session, connector, servers)
}

fn host() -> Address {
    Address::new("10.0.0.2", 3308)
}

// ── WebSocket round trips ────────────────────────────────────────

#[tokio::test]
async fn test_websocket_round_trip() {
    let (listener, address) = ephemeral_listener().await;
    let session = TransportSession::spawn(WebSocketConnector::default(), SessionConfig::default());
    let mut packets = packet_channel(&session);

    session.connect(address.clone());
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();
    wait_for_state(&session, ConnectionState::Connected).await;
    assert_eq!(session.status().address, Some(address));

    // Host → client
    let settings = Settings {
        fpfc: true,
        ..Settings::default()
    };
    let frame = Packet::Settings(settings.clone()).to_bytes().unwrap();
    ws.send(Message::Binary(frame)).await.unwrap();

    let received = tokio::time::timeout(TIMEOUT, packets.recv())
        .await
        .expect("timeout")
        .unwrap();
    assert_eq!(received, Packet::Settings(settings));

    // Client → host
    let input = InputDelta {
        dx: 4.0,
        keys_down: vec!["KeyA".into()],
        ..Default::default()
    };
    session.send(Packet::Input(input.clone()));
    let message = tokio::time::timeout(TIMEOUT, ws.next())
        .await
        .expect("timeout")
        .unwrap()
        .unwrap();
    match message {
        Message::Binary(frame) => assert_eq!(Packet::from_bytes(&frame).unwrap(), Packet::Input(input)),
        other => panic!("expected binary message, got {other:?}"),
    }

    session.disconnect();
    wait_for_state(&session, ConnectionState::Disconnected).await;
}

#[tokio::test]
async fn test_malformed_frame_is_dropped() {
    let (listener, address) = ephemeral_listener().await;
    let session = TransportSession::spawn(WebSocketConnector::default(), SessionConfig::default());
    let log = EventLog::record(&session);
    let mut packets = packet_channel(&session);

    session.connect(address);
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();
    wait_for_state(&session, ConnectionState::Connected).await;

    ws.send(Message::Binary(vec![0xFF, 0x01, 0x02])).await.unwrap();
    ws.send(Message::Text("hello".into())).await.unwrap();
    let chunk = Packet::VideoChunk(VideoChunk::new(vec![0, 0, 0, 1, 0x65, 0x10]));
    ws.send(Message::Binary(chunk.to_bytes().unwrap())).await.unwrap();

    let received = tokio::time::timeout(TIMEOUT, packets.recv())
        .await
        .expect("timeout")
        .unwrap();
    assert_eq!(received, chunk);
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(log.errors.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_websocket_host_close_triggers_reconnect() {
    let (listener, address) = ephemeral_listener().await;
    let session = TransportSession::spawn(
        WebSocketConnector::default(),
        SessionConfig {
            retry_delay: Duration::from_millis(50),
        },
    );
    let log = EventLog::record(&session);

    session.connect(address);
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();
    wait_for_state(&session, ConnectionState::Connected).await;

    ws.close(None).await.unwrap();
    drop(ws);

    // The retry lands on the same listener.
    let (stream, _) = tokio::time::timeout(TIMEOUT, listener.accept())
        .await
        .expect("timeout")
        .unwrap();
    let _ws = accept_async(stream).await.unwrap();
    eventually("second connect", || log.connected.load(Ordering::SeqCst) == 2).await;
    assert_eq!(log.disconnected.load(Ordering::SeqCst), 0);
}

// ── Session state machine ────────────────────────────────────────

#[tokio::test]
async fn test_connect_is_idempotent() {
    let (session, connector, mut servers) = mock_session(100);
    let log = EventLog::record(&session);

    session.connect(host());
    let _server = next_server(&mut servers).await;
    wait_for_state(&session, ConnectionState::Connected).await;

    session.connect(host());
    session.connect(host());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(connector.attempts(), 1);
    assert_eq!(log.connected.load(Ordering::SeqCst), 1);
    assert_eq!(
        log.states(),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
}

#[tokio::test]
async fn test_reconnects_after_abnormal_close() {
    let (session, connector, mut servers) = mock_session(100);
    let log = EventLog::record(&session);

    session.connect(host());
    let server = next_server(&mut servers).await;
    wait_for_state(&session, ConnectionState::Connected).await;

    drop(server);
    let _server = next_server(&mut servers).await;
    eventually("reconnected", || log.states().len() == 5).await;

    assert_eq!(
        log.states(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
    assert_eq!(log.disconnected.load(Ordering::SeqCst), 0);
    assert_eq!(log.connected.load(Ordering::SeqCst), 2);
    assert_eq!(connector.attempts(), 2);
    assert!(session.status().retry_enabled);
}

#[tokio::test]
async fn test_disconnect_while_reconnecting_cancels_retry() {
    let (session, connector, mut servers) = mock_session(300);
    let log = EventLog::record(&session);

    session.connect(host());
    let server = next_server(&mut servers).await;
    wait_for_state(&session, ConnectionState::Connected).await;

    drop(server);
    wait_for_state(&session, ConnectionState::Reconnecting).await;

    session.disconnect();
    wait_for_state(&session, ConnectionState::Disconnected).await;

    // Well past the retry delay.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(log.disconnected.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(!session.status().retry_enabled);
}

#[tokio::test]
async fn test_failed_attempts_keep_retrying() {
    let (session, connector, mut servers) = mock_session(20);
    let log = EventLog::record(&session);
    connector.set_failing(true);

    session.connect(host());
    eventually("three attempts", || connector.attempts() >= 3).await;
    assert!(log.errors.load(Ordering::SeqCst) >= 2);
    assert_eq!(log.disconnected.load(Ordering::SeqCst), 0);

    connector.set_failing(false);
    let _server = next_server(&mut servers).await;
    wait_for_state(&session, ConnectionState::Connected).await;
    assert_eq!(log.disconnected.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let (session, _connector, mut servers) = mock_session(100);
    let log = EventLog::record(&session);

    // Nothing to tear down yet.
    session.disconnect();

    session.connect(host());
    let _server = next_server(&mut servers).await;
    wait_for_state(&session, ConnectionState::Connected).await;

    session.disconnect();
    session.disconnect();
    wait_for_state(&session, ConnectionState::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(log.disconnected.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_local_disconnect_does_not_reconnect() {
    let (session, connector, mut servers) = mock_session(20);

    session.connect(host());
    let mut server = next_server(&mut servers).await;
    wait_for_state(&session, ConnectionState::Connected).await;

    session.disconnect();
    // The host sees the link close.
    let closed = tokio::time::timeout(TIMEOUT, server.from_client.next())
        .await
        .expect("timeout");
    assert!(closed.is_none());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn test_send_while_disconnected_is_dropped() {
    let (session, _connector, mut servers) = mock_session(100);

    session.send(Packet::Input(InputDelta {
        dx: 1.0,
        ..Default::default()
    }));

    session.connect(host());
    let mut server = next_server(&mut servers).await;
    wait_for_state(&session, ConnectionState::Connected).await;

    let live = Packet::Input(InputDelta {
        dx: 2.0,
        ..Default::default()
    });
    session.send(live.clone());
    assert_eq!(server.recv().await, live);
}

#[tokio::test]
async fn test_connect_elsewhere_replaces_link() {
    let (session, connector, mut servers) = mock_session(100);
    let log = EventLog::record(&session);
    let other = Address::new("10.0.0.3", 3308);

    session.connect(host());
    let _first = next_server(&mut servers).await;
    wait_for_state(&session, ConnectionState::Connected).await;

    session.connect(other.clone());
    let _second = next_server(&mut servers).await;
    eventually("second link", || log.connected.load(Ordering::SeqCst) == 2).await;

    assert_eq!(log.disconnected.load(Ordering::SeqCst), 1);
    assert_eq!(connector.attempts(), 2);
    assert_eq!(session.status().address, Some(other));
}

// ── Input capture ────────────────────────────────────────────────

#[tokio::test]
async fn test_input_capture_sends_coalesced_deltas() {
    let (session, _connector, mut servers) = mock_session(100);
    session.connect(host());
    let mut server = next_server(&mut servers).await;
    wait_for_state(&session, ConnectionState::Connected).await;

    let (capture, _task) = InputCapture::spawn(session.clone(), Duration::from_millis(10));

    // Ignored: capture not started.
    capture.event(InputEvent::KeyDown("KeyQ".into()));

    capture.start();
    capture.event(InputEvent::MouseMove { dx: 1.0, dy: 1.0 });
    capture.event(InputEvent::MouseMove { dx: 2.0, dy: 1.0 });
    capture.event(InputEvent::KeyDown("KeyW".into()));

    match server.recv().await {
        Packet::Input(delta) => {
            assert_eq!(delta.dx, 3.0);
            assert_eq!(delta.dy, -2.0);
            assert_eq!(delta.keys_down, vec!["KeyW"]);
        }
        other => panic!("expected input, got {:?}", other.kind()),
    }

    capture.stop();
}

// ── Full client ──────────────────────────────────────────────────

struct ChannelDecoder {
    tx: mpsc::UnboundedSender<EncodedChunk>,
}

impl VideoDecoder for ChannelDecoder {
    fn decode(&mut self, chunk: EncodedChunk) -> Result<(), DecoderError> {
        self.tx.send(chunk).map_err(|_| DecoderError::Closed)
    }

    fn queue_size(&self) -> usize {
        0
    }

    fn reset(&mut self) -> Result<(), DecoderError> {
        Ok(())
    }
}

#[derive(Default)]
struct AudioProbe {
    opened: Mutex<Vec<AudioFormat>>,
    released: AtomicUsize,
}

struct ProbeBackend(Arc<AudioProbe>);

struct ProbeGraph {
    probe: Arc<AudioProbe>,
    _renderer: AudioRenderer,
}

impl AudioBackend for ProbeBackend {
    type Graph = ProbeGraph;

    fn open(&mut self, format: &AudioFormat, renderer: AudioRenderer) -> Result<ProbeGraph, AudioError> {
        self.0.opened.lock().push(*format);
        Ok(ProbeGraph {
            probe: self.0.clone(),
            _renderer: renderer,
        })
    }
}

impl OutputGraph for ProbeGraph {
    fn play(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn latency(&self) -> Duration {
        Duration::ZERO
    }
}

impl Drop for ProbeGraph {
    fn drop(&mut self) {
        self.probe.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_stream_client_pipeline() {
    let (session, _connector, mut servers) = mock_session(100);
    let (decoded_tx, mut decoded) = mpsc::unbounded_channel();
    let (video, _feed) = VideoFeed::spawn(
        SchedulerConfig {
            policy: ParameterSetPolicy::Standalone,
            ..SchedulerConfig::default()
        },
        |_signal| ChannelDecoder { tx: decoded_tx },
    );
    let (input, _capture) = InputCapture::spawn(session.clone(), Duration::from_millis(10));
    let probe = Arc::new(AudioProbe::default());
    let client = StreamClient::spawn(
        session.clone(),
        video,
        input,
        ProbeBackend(probe.clone()),
        StreamClientConfig {
            latency_report_interval: Duration::from_millis(20),
            ..StreamClientConfig::default()
        },
    );

    client.connect(host());
    let mut server = next_server(&mut servers).await;
    wait_for_state(&session, ConnectionState::Connected).await;

    // Not sent: the host has not shared its settings yet.
    client.update_settings(Settings::default());

    let settings = Settings {
        fpfc: true,
        ..Settings::default()
    };
    server.send(&Packet::Settings(settings.clone()));
    server.send(&Packet::VideoChunk(VideoChunk::new(Bytes::from_static(&[0, 0, 0, 1, 0x67, 0x42]))));
    server.send(&Packet::VideoChunk(VideoChunk::new(Bytes::from_static(&[0, 0, 0, 1, 0x65, 0x88]))));
    server.send(&Packet::AudioChunk(AudioChunk {
        sample_rate: 48_000,
        channels: 2,
        samples: vec![0.1; 960],
    }));

    for _ in 0..2 {
        let chunk = tokio::time::timeout(TIMEOUT, decoded.recv())
            .await
            .expect("timeout")
            .unwrap();
        assert_eq!(chunk.chunk_type, qstream_core::video::ChunkType::Key);
    }

    eventually("audio configured", || !probe.opened.lock().is_empty()).await;
    assert_eq!(probe.opened.lock()[0], AudioFormat::new(48_000, 2, 0.2));
    eventually("settings stored", || client.settings().is_some()).await;
    eventually("latency report", || client.audio_latency().is_some()).await;

    let changed = Settings {
        fov: 90.0,
        ..settings
    };
    client.update_settings(changed.clone());
    assert_eq!(server.recv().await, Packet::Settings(changed));

    client.disconnect();
    eventually("audio released", || probe.released.load(Ordering::SeqCst) == 1).await;
    eventually("settings cleared", || client.settings().is_none()).await;

    client.shutdown().await;
}
