//! Domain-specific error types for the streaming core.
//!
//! Fallible operations return `Result<T, StreamError>`, or the narrower
//! `AudioError` / `DecoderError` where only one subsystem is involved.
//! Nothing here is fatal to the process: transport errors feed the
//! reconnection loop, decode errors drop a packet.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the streaming core.
#[derive(Debug, Error)]
pub enum StreamError {
    // ── Wire Errors ──────────────────────────────────────────────
    /// A payload could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The encoded packet exceeds the frame limit.
    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// An address string could not be parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The WebSocket layer reported an error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A connection attempt exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// A connection state transition was requested from the wrong state.
    #[error("invalid state transition: {0}")]
    InvalidTransition(&'static str),

    // ── Media Errors ─────────────────────────────────────────────
    /// The audio output path failed.
    #[error("audio error: {0}")]
    Audio(#[from] AudioError),

    /// The video decoder failed.
    #[error("decoder error: {0}")]
    Decoder(#[from] DecoderError),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── AudioError ────────────────────────────────────────────────────

/// Errors raised while configuring or driving an audio output graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AudioError {
    /// The requested format cannot be played.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// No usable output device was found.
    #[error("no output device: {0}")]
    NoDevice(String),

    /// The platform audio backend reported a failure.
    #[error("audio backend failure: {0}")]
    Backend(String),
}

// ── DecoderError ──────────────────────────────────────────────────

/// Errors reported by a video decode engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecoderError {
    /// The decoder cannot be configured for this stream.
    #[error("decoder configuration rejected: {0}")]
    Unsupported(String),

    /// The decoder hit an unrecoverable error.
    #[error("decode failed: {0}")]
    Failed(String),

    /// The decoder has gone away.
    #[error("decoder closed")]
    Closed,
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for StreamError {
    fn from(s: String) -> Self {
        StreamError::Other(s)
    }
}

impl From<&str> for StreamError {
    fn from(s: &str) -> Self {
        StreamError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for StreamError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        StreamError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for StreamError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        StreamError::Encoding(e.to_string())
    }
}
