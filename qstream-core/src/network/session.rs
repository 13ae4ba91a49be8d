//! Transport session: one persistent link to the streaming host.
//!
//! A `TransportSession` is a cheap cloneable handle to an actor task that
//! owns the link. Commands (`connect`, `disconnect`, `send`) are queued to
//! the actor and never block the caller. The actor drives the
//! [`ConnectionState`] machine, decodes inbound frames into [`Packet`]s and
//! fans them out through [`SessionEvents`].
//!
//! ```text
//!  caller ──Command──► actor ──spawn──► connect attempt ──Notice──┐
//!                        ▲                                        │
//!                        ├──────────── Notice ◄── link driver ◄───┘
//!                        └──────────── Notice ◄── retry timer
//! ```
//!
//! Every spawned helper tags its notices with the generation it was
//! started under; the actor bumps the generation whenever it abandons a
//! link, so late notices from a dead link are discarded.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::StreamError;
use crate::event::EventChannel;
use crate::network::{Address, Connector, FrameSink, FrameStream};
use crate::packet::Packet;
use crate::state::{ConnectionState, ConnectionStatus};

/// Delay between a lost link and the next connection attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Tunables for a [`TransportSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed delay before each reconnection attempt.
    pub retry_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Notification channels exposed by a session.
#[derive(Debug, Default)]
pub struct SessionEvents {
    /// A link to the given address is up.
    pub connected: EventChannel<Address>,
    /// The session reached `Disconnected`. Never fired inside the
    /// reconnect loop.
    pub disconnected: EventChannel<()>,
    /// A link failed or closed with an error.
    pub error: EventChannel<StreamError>,
    /// A packet arrived.
    pub packet: EventChannel<Packet>,
    /// Every state transition, in order.
    pub state_changed: EventChannel<ConnectionState>,
}

enum Command {
    Connect(Address),
    Disconnect,
    Send(Packet),
}

/// Handle to a running session.
#[derive(Clone)]
pub struct TransportSession {
    commands: mpsc::UnboundedSender<Command>,
    events: Arc<SessionEvents>,
    status: watch::Receiver<ConnectionStatus>,
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl TransportSession {
    /// Start the session actor on the current tokio runtime.
    ///
    /// The actor lives until every handle is dropped.
    pub fn spawn<C: Connector>(connector: C, config: SessionConfig) -> Self {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (notices_tx, notices) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionStatus::default());
        let events = Arc::new(SessionEvents::default());

        let actor = SessionActor {
            connector: Arc::new(connector),
            config,
            events: Arc::clone(&events),
            status: status_tx,
            state: ConnectionState::Disconnected,
            target: None,
            link: Link::Idle,
            retry_enabled: false,
            generation: 0,
            commands,
            notices_tx,
            notices,
        };
        tokio::spawn(actor.run());

        Self {
            commands: commands_tx,
            events,
            status,
        }
    }

    /// Open a link to `address`, retrying on loss until [`disconnect`].
    ///
    /// Does nothing when the session is already connected, connecting or
    /// reconnecting to the same address.
    ///
    /// [`disconnect`]: Self::disconnect
    pub fn connect(&self, address: Address) {
        self.command(Command::Connect(address));
    }

    /// Close the link and stop retrying. Safe from any state.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Transmit a packet. Dropped silently when not connected.
    pub fn send(&self, packet: Packet) {
        self.command(Command::Send(packet));
    }

    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Receiver for awaiting status changes.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("transport session task is gone; command ignored");
        }
    }
}

// ── Actor ─────────────────────────────────────────────────────────

enum Notice {
    Opened {
        generation: u64,
        sink: FrameSink,
        stream: FrameStream,
    },
    Failed {
        generation: u64,
        error: StreamError,
    },
    Frame {
        generation: u64,
        frame: Vec<u8>,
    },
    Closed {
        generation: u64,
        error: Option<StreamError>,
    },
    RetryDue {
        generation: u64,
    },
}

impl Notice {
    fn generation(&self) -> u64 {
        match self {
            Self::Opened { generation, .. }
            | Self::Failed { generation, .. }
            | Self::Frame { generation, .. }
            | Self::Closed { generation, .. }
            | Self::RetryDue { generation } => *generation,
        }
    }
}

/// Resources held in each state. `Idle` iff the state is `Disconnected`.
enum Link {
    Idle,
    Connecting {
        address: Address,
        attempt: JoinHandle<()>,
    },
    Connected {
        address: Address,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
    },
    Reconnecting {
        address: Address,
        retry: CancellationToken,
    },
}

impl Link {
    fn address(&self) -> Option<&Address> {
        match self {
            Self::Idle => None,
            Self::Connecting { address, .. }
            | Self::Connected { address, .. }
            | Self::Reconnecting { address, .. } => Some(address),
        }
    }
}

struct SessionActor<C> {
    connector: Arc<C>,
    config: SessionConfig,
    events: Arc<SessionEvents>,
    status: watch::Sender<ConnectionStatus>,
    state: ConnectionState,
    target: Option<Address>,
    link: Link,
    retry_enabled: bool,
    generation: u64,
    commands: mpsc::UnboundedReceiver<Command>,
    notices_tx: mpsc::UnboundedSender<Notice>,
    notices: mpsc::UnboundedReceiver<Notice>,
}

impl<C: Connector> SessionActor<C> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(notice) = self.notices.recv() => self.handle_notice(notice),
            }
        }

        self.retry_enabled = false;
        self.teardown();
        debug!("transport session stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(address) => self.connect(address),
            Command::Disconnect => self.disconnect(),
            Command::Send(packet) => self.send(packet),
        }
    }

    fn handle_notice(&mut self, notice: Notice) {
        if notice.generation() != self.generation {
            trace!("discarding notice from an abandoned link");
            return;
        }
        match notice {
            Notice::Opened { sink, stream, .. } => self.on_opened(sink, stream),
            Notice::Failed { error, .. } => {
                warn!("connection attempt failed: {error}");
                self.events.error.emit(&error);
                self.on_lost();
            }
            Notice::Frame { frame, .. } => self.on_frame(&frame),
            Notice::Closed { error, .. } => {
                match error {
                    Some(error) => {
                        warn!("link closed with error: {error}");
                        self.events.error.emit(&error);
                    }
                    None => info!("host closed the connection"),
                }
                self.on_lost();
            }
            Notice::RetryDue { .. } => self.on_retry_due(),
        }
    }

    // ── Commands ─────────────────────────────────────────────────

    fn connect(&mut self, address: Address) {
        if self.link.address() == Some(&address) {
            debug!("already {} to {address}", self.state);
            return;
        }
        self.teardown();
        self.retry_enabled = true;
        self.target = Some(address.clone());
        self.start_attempt(address);
    }

    fn disconnect(&mut self) {
        self.retry_enabled = false;
        if matches!(self.link, Link::Idle) {
            debug!("disconnect requested while already disconnected");
            self.publish();
            return;
        }
        if let Some(address) = self.link.address() {
            info!("disconnecting from {address}");
        }
        self.teardown();
    }

    fn send(&mut self, packet: Packet) {
        let Link::Connected { outbound, .. } = &self.link else {
            trace!("not connected; dropping outbound {} packet", packet.kind());
            return;
        };
        match packet.to_bytes() {
            Ok(frame) => {
                // A closed channel means the link is going down; the
                // driver reports that on its own.
                let _ = outbound.send(frame);
            }
            Err(e) => warn!("failed to encode {} packet: {e}", packet.kind()),
        }
    }

    // ── Link lifecycle ───────────────────────────────────────────

    fn start_attempt(&mut self, address: Address) {
        if !self.transition(ConnectionState::begin_connect) {
            return;
        }
        self.generation += 1;
        let generation = self.generation;
        let connector = Arc::clone(&self.connector);
        let notices = self.notices_tx.clone();
        let target = address.clone();

        let attempt = tokio::spawn(async move {
            let notice = match connector.connect(&target).await {
                Ok((sink, stream)) => Notice::Opened {
                    generation,
                    sink,
                    stream,
                },
                Err(error) => Notice::Failed { generation, error },
            };
            let _ = notices.send(notice);
        });

        info!("connecting to {address}");
        self.link = Link::Connecting { address, attempt };
    }

    fn on_opened(&mut self, sink: FrameSink, stream: FrameStream) {
        let address = match &self.link {
            Link::Connecting { address, .. } => address.clone(),
            _ => return,
        };
        if !self.transition(ConnectionState::complete_connect) {
            return;
        }

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive_link(
            self.generation,
            sink,
            stream,
            outbound_rx,
            self.notices_tx.clone(),
        ));

        info!("connected to {address}");
        self.link = Link::Connected {
            address: address.clone(),
            outbound,
        };
        self.events.connected.emit(&address);
    }

    /// The current link failed or closed without being asked to.
    fn on_lost(&mut self) {
        let address = match &self.link {
            Link::Connecting { address, .. } | Link::Connected { address, .. } => address.clone(),
            _ => return,
        };
        if !self.retry_enabled {
            self.teardown();
            return;
        }
        if !self.transition(ConnectionState::lose_connection) {
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        let delay = self.config.retry_delay;
        let notices = self.notices_tx.clone();
        let retry = CancellationToken::new();
        let cancelled = retry.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = notices.send(Notice::RetryDue { generation });
                }
            }
        });

        info!("reconnecting to {address} in {delay:?}");
        self.link = Link::Reconnecting { address, retry };
    }

    fn on_retry_due(&mut self) {
        match std::mem::replace(&mut self.link, Link::Idle) {
            Link::Reconnecting { address, .. } => self.start_attempt(address),
            other => self.link = other,
        }
    }

    fn on_frame(&mut self, frame: &[u8]) {
        match Packet::from_bytes(frame) {
            Ok(packet) => {
                trace!("received {} packet", packet.kind());
                self.events.packet.emit(&packet);
            }
            Err(e) => warn!("dropping malformed frame ({} bytes): {e}", frame.len()),
        }
    }

    /// Release whatever the current state holds and fall back to
    /// `Disconnected`, emitting the disconnected event once.
    fn teardown(&mut self) {
        match std::mem::replace(&mut self.link, Link::Idle) {
            Link::Idle => return,
            Link::Connecting { attempt, .. } => attempt.abort(),
            // Dropping the sender makes the driver close the socket.
            Link::Connected { outbound, .. } => drop(outbound),
            Link::Reconnecting { retry, .. } => retry.cancel(),
        }
        self.generation += 1;
        if self.transition(ConnectionState::finish_disconnect) {
            self.events.disconnected.emit(&());
        }
    }

    // ── State ────────────────────────────────────────────────────

    fn transition(
        &mut self,
        step: impl FnOnce(&mut ConnectionState) -> Result<(), StreamError>,
    ) -> bool {
        let from = self.state;
        match step(&mut self.state) {
            Ok(()) => {
                debug!("connection {from} -> {}", self.state);
                self.publish();
                self.events.state_changed.emit(&self.state);
                true
            }
            Err(e) => {
                warn!("ignoring transition from {from}: {e}");
                false
            }
        }
    }

    fn publish(&self) {
        self.status.send_replace(ConnectionStatus {
            address: self.target.clone(),
            state: self.state,
            retry_enabled: self.retry_enabled,
        });
    }
}

/// Pump frames between the socket and the actor until either side closes.
async fn drive_link(
    generation: u64,
    mut sink: FrameSink,
    mut stream: FrameStream,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    notices: mpsc::UnboundedSender<Notice>,
) {
    let error = loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        break Some(e);
                    }
                }
                None => {
                    if let Err(e) = sink.close().await {
                        debug!("error while closing link: {e}");
                    }
                    return;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(frame)) => {
                    if notices.send(Notice::Frame { generation, frame }).is_err() {
                        return;
                    }
                }
                Some(Err(e)) => break Some(e),
                None => break None,
            },
        }
    };
    let _ = notices.send(Notice::Closed { generation, error });
}
