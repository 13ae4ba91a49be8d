//! Latency-gated release of encoded video chunks to the decoder.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::error::DecoderError;
use crate::video::decoder::{ChunkType, EncodedChunk, VideoDecoder};
use crate::video::nal::{self, ChunkKind};

/// How parameter-set chunks reach the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterSetPolicy {
    /// Hold the parameter set and prepend it to the next key chunk.
    #[default]
    CombineWithKey,
    /// Submit the parameter set as a chunk of its own.
    Standalone,
}

/// Initial settings for a [`VideoFeedScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub policy: ParameterSetPolicy,
    /// Frames per second of the incoming stream.
    pub frame_rate: f64,
    /// Seconds of video to keep buffered; 0 releases immediately.
    pub latency_target: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: ParameterSetPolicy::default(),
            frame_rate: 30.0,
            latency_target: 0.0,
        }
    }
}

/// Running counters and state of a scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub received: u64,
    pub released: u64,
    pub dropped: u64,
    pub pending: usize,
    pub errored: bool,
}

#[derive(Debug)]
struct PendingChunk {
    kind: ChunkKind,
    data: Bytes,
}

enum Admission {
    Queue(PendingChunk),
    Held,
    Drop,
}

/// Buffers encoded chunks and releases them to a decoder so that the
/// buffered backlog tracks a latency target.
///
/// A release is attempted after every enqueue and every decoder-ready
/// notification, one chunk per attempt. The front chunk goes out when
///
/// ```text
/// target == 0  ||  (fps >= 1  &&  (decoder.queue_size() + queued) / fps >= target)
/// ```
///
/// Nothing is released until the decoder has seen a parameter set.
pub struct VideoFeedScheduler<D> {
    decoder: D,
    policy: ParameterSetPolicy,
    pending: VecDeque<PendingChunk>,
    latency_target: f64,
    frame_rate: f64,
    held_parameter_set: Option<Bytes>,
    bootstrapped: bool,
    errored: bool,
    received: u64,
    released: u64,
    dropped: u64,
}

impl<D: VideoDecoder> VideoFeedScheduler<D> {
    pub fn new(decoder: D, config: SchedulerConfig) -> Self {
        Self {
            decoder,
            policy: config.policy,
            pending: VecDeque::new(),
            latency_target: sanitize_target(config.latency_target),
            frame_rate: config.frame_rate,
            held_parameter_set: None,
            bootstrapped: false,
            errored: false,
            received: 0,
            released: 0,
            dropped: 0,
        }
    }

    /// Accept a chunk from the session and attempt a release.
    pub fn enqueue(&mut self, chunk: Bytes) {
        self.received += 1;
        if self.errored {
            trace!("decoder errored; dropping video chunk");
            self.dropped += 1;
            return;
        }
        let Some(kind) = nal::classify(&chunk) else {
            warn!("dropping {}-byte video chunk without a NAL header", chunk.len());
            self.dropped += 1;
            return;
        };
        if !nal::has_start_code(&chunk) {
            warn!("video chunk does not begin with an Annex-B start code");
        }

        match self.admit(kind, chunk) {
            Admission::Queue(pending) => self.pending.push_back(pending),
            Admission::Held => {}
            Admission::Drop => {
                trace!("dropping {kind:?} chunk before parameter set");
                self.dropped += 1;
            }
        }
        self.try_feed();
    }

    fn admit(&mut self, kind: ChunkKind, data: Bytes) -> Admission {
        match (self.policy, kind) {
            (ParameterSetPolicy::CombineWithKey, ChunkKind::ParameterSet) => {
                if self.held_parameter_set.replace(data).is_some() {
                    debug!("replacing held parameter set");
                }
                Admission::Held
            }
            (ParameterSetPolicy::CombineWithKey, ChunkKind::Key) => {
                match self.held_parameter_set.take() {
                    Some(parameter_set) => {
                        let mut combined = BytesMut::with_capacity(parameter_set.len() + data.len());
                        combined.extend_from_slice(&parameter_set);
                        combined.extend_from_slice(&data);
                        self.bootstrapped = true;
                        Admission::Queue(PendingChunk {
                            kind: ChunkKind::Key,
                            data: combined.freeze(),
                        })
                    }
                    None if self.bootstrapped => Admission::Queue(PendingChunk { kind, data }),
                    None => Admission::Drop,
                }
            }
            (ParameterSetPolicy::Standalone, ChunkKind::ParameterSet) => {
                self.bootstrapped = true;
                Admission::Queue(PendingChunk { kind, data })
            }
            _ if self.bootstrapped => Admission::Queue(PendingChunk { kind, data }),
            _ => Admission::Drop,
        }
    }

    /// Release the front chunk if the feed policy allows. Returns whether
    /// a chunk went to the decoder.
    pub fn try_feed(&mut self) -> bool {
        if self.errored || !self.at_latency() {
            return false;
        }
        let Some(chunk) = self.pending.pop_front() else {
            return false;
        };
        let chunk_type = if chunk.kind.is_key() {
            ChunkType::Key
        } else {
            ChunkType::Delta
        };
        match self.decoder.decode(EncodedChunk {
            chunk_type,
            data: chunk.data,
        }) {
            Ok(()) => {
                self.released += 1;
                true
            }
            Err(e) => {
                self.on_decoder_error(e);
                false
            }
        }
    }

    fn at_latency(&self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        if self.latency_target == 0.0 {
            return true;
        }
        if self.frame_rate < 1.0 {
            return false;
        }
        let backlog = (self.decoder.queue_size() + self.pending.len()) as f64;
        backlog / self.frame_rate >= self.latency_target
    }

    /// The decoder drained some of its queue.
    pub fn on_decoder_ready(&mut self) {
        self.try_feed();
    }

    /// The decoder hit an unrecoverable error. Nothing is released until
    /// [`flush`](Self::flush).
    pub fn on_decoder_error(&mut self, error: DecoderError) {
        if !self.errored {
            error!("video decoder failed: {error}; holding feed until flush");
        }
        self.errored = true;
    }

    /// Seconds of buffered video to aim for. Negative or non-finite values
    /// mean immediate release.
    pub fn set_latency_target(&mut self, seconds: f64) {
        self.latency_target = sanitize_target(seconds);
        self.try_feed();
    }

    pub fn set_frame_rate(&mut self, fps: f64) {
        self.frame_rate = fps;
        self.try_feed();
    }

    /// Discard queued chunks, wait for a fresh parameter set, clear the
    /// errored state and reset the decoder.
    pub fn flush(&mut self) {
        let discarded = self.pending.len();
        self.pending.clear();
        self.held_parameter_set = None;
        self.bootstrapped = false;
        self.errored = false;
        if let Err(e) = self.decoder.reset() {
            self.on_decoder_error(e);
        }
        debug!("video feed flushed ({discarded} chunks discarded)");
    }

    pub fn stats(&self) -> FeedStats {
        FeedStats {
            received: self.received,
            released: self.released,
            dropped: self.dropped,
            pending: self.pending.len(),
            errored: self.errored,
        }
    }

    pub fn latency_target(&self) -> f64 {
        self.latency_target
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn is_errored(&self) -> bool {
        self.errored
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    pub fn decoder_mut(&mut self) -> &mut D {
        &mut self.decoder
    }
}

fn sanitize_target(seconds: f64) -> f64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        0.0
    }
}
