//! Video path: encoded chunks from the session are paced into an external
//! decoder so that buffered video tracks a latency target.

mod decoder;
mod feed;
pub mod nal;
mod scheduler;

pub use decoder::{ChunkType, EncodedChunk, VideoDecoder};
pub use feed::{DecoderSignal, FeedMessage, VideoFeed};
pub use scheduler::{FeedStats, ParameterSetPolicy, SchedulerConfig, VideoFeedScheduler};
