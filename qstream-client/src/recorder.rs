//! Annex-B recorder: a [`VideoDecoder`] that writes every released chunk
//! to a byte sink instead of decoding it.
//!
//! The output plays back with any H.264 elementary-stream player
//! (`ffplay -f h264 out.h264`).

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use qstream_core::video::{ChunkType, EncodedChunk, VideoDecoder};
use qstream_core::{DecoderError, DecoderSignal};
use tracing::{debug, info};

pub struct AnnexBRecorder<W: Write + Send> {
    out: W,
    signal: DecoderSignal,
    chunks: u64,
    keys: u64,
    bytes: u64,
}

/// Where recorded video goes: a new file at `path`, or nowhere.
pub fn open_output(path: Option<&Path>) -> io::Result<Box<dyn Write + Send>> {
    match path {
        Some(path) => {
            let file = File::create(path)?;
            info!("recording video to {}", path.display());
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(io::sink())),
    }
}

impl<W: Write + Send> AnnexBRecorder<W> {
    pub fn new(out: W, signal: DecoderSignal) -> Self {
        Self {
            out,
            signal,
            chunks: 0,
            keys: 0,
            bytes: 0,
        }
    }

    /// Chunks written since the last reset.
    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> VideoDecoder for AnnexBRecorder<W> {
    fn decode(&mut self, chunk: EncodedChunk) -> Result<(), DecoderError> {
        self.out
            .write_all(&chunk.data)
            .map_err(|e| DecoderError::Failed(e.to_string()))?;
        self.chunks += 1;
        self.bytes += chunk.data.len() as u64;
        if chunk.chunk_type == ChunkType::Key {
            self.keys += 1;
        }
        // Written synchronously, so the queue is already drained.
        self.signal.ready();
        Ok(())
    }

    fn queue_size(&self) -> usize {
        0
    }

    fn reset(&mut self) -> Result<(), DecoderError> {
        self.out
            .flush()
            .map_err(|e| DecoderError::Failed(e.to_string()))?;
        debug!(
            "recorder reset after {} chunks ({} key, {} bytes)",
            self.chunks, self.keys, self.bytes
        );
        self.chunks = 0;
        self.keys = 0;
        self.bytes = 0;
        Ok(())
    }
}
