//! Connection state machine for the transport session.
//!
//! Provides a `ConnectionState` enum with validated transitions that
//! return `Result` instead of panicking, and the `ConnectionStatus`
//! snapshot published to observers.

use crate::error::StreamError;
use crate::network::Address;

// ── ConnectionState ──────────────────────────────────────────────

/// The current state of the session's link to the host.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected
///       ▲               │  ▲            │
///       │               ▼  │            ▼
///       └─────────── Reconnecting ◄─────┘
/// ```
///
/// Every state can fall back to `Disconnected` through an explicit
/// disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum ConnectionState {
    /// No link and no pending retry. Initial / terminal state.
    #[default]
    Disconnected,

    /// A connection attempt is in flight.
    Connecting,

    /// The socket is open and packets flow.
    Connected,

    /// The link dropped; a retry is scheduled.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Returns `true` while the session is working toward, or holding, a
    /// link: every state except `Disconnected`.
    pub fn is_active(&self) -> bool {
        !self.is_disconnected()
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Disconnected`, `Reconnecting` (retry timer fired).
    pub fn begin_connect(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Disconnected | Self::Reconnecting => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot connect: a link is already in progress",
            )),
        }
    }

    /// Transition to `Connected`.
    ///
    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected;
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot complete connect: not in Connecting state",
            )),
        }
    }

    /// Transition to `Reconnecting` after the link failed or closed.
    ///
    /// Valid from: `Connecting` (attempt failed), `Connected` (link lost).
    pub fn lose_connection(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Connecting | Self::Connected => {
                *self = Self::Reconnecting;
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot reconnect: no link to lose",
            )),
        }
    }

    /// Transition to `Disconnected`.
    ///
    /// Valid from every state except `Disconnected` itself, which lets the
    /// caller emit exactly one disconnected notification.
    pub fn finish_disconnect(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Disconnected => Err(StreamError::InvalidTransition(
                "already disconnected",
            )),
            _ => {
                *self = Self::Disconnected;
                Ok(())
            }
        }
    }
}

// ── ConnectionStatus ─────────────────────────────────────────────

/// Read-only snapshot of the session's connection record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    /// Address of the current or most recent link target.
    pub address: Option<Address>,
    pub state: ConnectionState,
    /// Whether a lost link will be retried.
    pub retry_enabled: bool,
}

// ── Tests ────────────────────────────────────────────────────────
