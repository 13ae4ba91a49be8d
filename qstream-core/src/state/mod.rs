//! Connection state tracking.

pub mod connection;

pub use connection::{ConnectionState, ConnectionStatus};
