//! Socket primitive used by the transport session.
//!
//! A [`Connector`] opens one link and hands back its two halves as a
//! boxed frame sink and frame stream. Message boundaries are the
//! connector's job; the session only ever sees whole frames.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

use crate::error::StreamError;
use crate::network::Address;

/// Outbound half of a link: accepts whole encoded frames.
pub type FrameSink = Pin<Box<dyn Sink<Vec<u8>, Error = StreamError> + Send>>;

/// Inbound half of a link: yields whole frames until the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, StreamError>> + Send>>;

/// Opens links to a streaming host.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, address: &Address) -> Result<(FrameSink, FrameStream), StreamError>;
}

// ── WebSocketConnector ───────────────────────────────────────────

/// Production connector: one WebSocket binary message per frame.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, address: &Address) -> Result<(FrameSink, FrameStream), StreamError> {
        let url = address.ws_url();
        debug!("opening websocket to {url}");

        let (ws, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| StreamError::Timeout(self.connect_timeout))??;

        let (ws_writer, ws_reader) = ws.split();

        let sink = ws_writer
            .sink_map_err(StreamError::from)
            .with(|frame: Vec<u8>| future::ready(Ok::<_, StreamError>(Message::Binary(frame))));

        let stream = ws_reader.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Binary(frame)) => Some(Ok(frame)),
                Ok(Message::Close(reason)) => {
                    debug!("peer sent close: {reason:?}");
                    None
                }
                Ok(other) => {
                    trace!("ignoring non-binary message ({} bytes)", other.len());
                    None
                }
                Err(e) => Some(Err(StreamError::from(e))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
