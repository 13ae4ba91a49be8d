//! Decoder seam and the chunk types handed across it.

use bytes::Bytes;

use crate::error::DecoderError;

/// How the decoder should treat a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    Key,
    Delta,
}

/// One chunk released to the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub chunk_type: ChunkType,
    pub data: Bytes,
}

/// Contract with the external video decode engine.
///
/// Decoding is asynchronous from the scheduler's point of view: `decode`
/// only submits. The engine reports progress through the
/// [`DecoderSignal`](crate::video::DecoderSignal) it was built with.
pub trait VideoDecoder: Send {
    /// Submit one chunk.
    fn decode(&mut self, chunk: EncodedChunk) -> Result<(), DecoderError>;

    /// Chunks submitted but not yet decoded.
    fn queue_size(&self) -> usize;

    /// Drop all pending work and reconfigure for a fresh stream.
    fn reset(&mut self) -> Result<(), DecoderError>;
}
