//! # qstream-core
//!
//! Client-side core of a real-time media stream: receives compressed
//! video and raw audio from a streaming host over a persistent WebSocket,
//! paces both under a latency budget, and sends coalesced input back.
//!
//! This crate contains:
//! - **Packet**: the bincode wire format (`Packet` and its payloads)
//! - **Network**: `TransportSession`, a reconnecting link driven by an explicit state machine
//! - **State**: `ConnectionState` with validated transitions
//! - **Ring**: `RingBuffer`, a wait-free SPSC queue for real-time audio
//! - **Audio**: `AudioPlaybackEngine` and the render-side `AudioRenderer`
//! - **Video**: `VideoFeedScheduler`, which releases chunks to a decoder under a latency target
//! - **Input**: `InputAggregator` and the ticking `InputCapture`
//! - **Client**: `StreamClient`, which wires all of the above together
//! - **Error**: `StreamError` and friends, typed with `thiserror`

pub mod audio;
pub mod client;
pub mod error;
pub mod event;
pub mod input;
pub mod network;
pub mod packet;
pub mod ring;
pub mod state;
pub mod video;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use audio::{AudioBackend, AudioFormat, AudioPlaybackEngine, AudioRenderer, OutputGraph};
pub use client::{StreamClient, StreamClientConfig};
pub use error::{AudioError, DecoderError, StreamError};
pub use event::{EventChannel, SubscriptionId};
pub use input::{InputAggregator, InputCapture, InputEvent, MouseButton};
pub use network::{Address, Connector, SessionConfig, TransportSession, WebSocketConnector};
pub use packet::{AudioChunk, InputDelta, Packet, PacketKind, Settings, VideoChunk};
pub use ring::{Consumer, Producer, RingBuffer};
pub use state::{ConnectionState, ConnectionStatus};
pub use video::{
    DecoderSignal, EncodedChunk, ParameterSetPolicy, SchedulerConfig, VideoDecoder, VideoFeed,
    VideoFeedScheduler,
};
