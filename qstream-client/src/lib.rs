//! # qstream-client: headless stream client
//!
//! Connects to a streaming host, records the released video stream to an
//! Annex-B file and plays (or drains) audio, all on top of `qstream-core`.

pub mod config;
pub mod output;
pub mod recorder;
