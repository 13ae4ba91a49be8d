//! Link to the streaming host: addressing, socket primitive and the
//! reconnecting transport session.

mod address;
mod connection;
mod session;

pub use address::{Address, DEFAULT_PORT};
pub use connection::{Connector, FrameSink, FrameStream, WebSocketConnector};
pub use session::{DEFAULT_RETRY_DELAY, SessionConfig, SessionEvents, TransportSession};
