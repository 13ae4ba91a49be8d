//! Decode-feed context: a task that owns a [`VideoFeedScheduler`] and
//! its decoder, driven entirely by messages.

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::DecoderError;
use crate::video::decoder::VideoDecoder;
use crate::video::scheduler::{FeedStats, SchedulerConfig, VideoFeedScheduler};

/// Requests from the control context.
#[derive(Debug)]
pub enum FeedMessage {
    Chunk(Bytes),
    /// Seconds of buffered video to aim for.
    LatencyTarget(f64),
    FrameRate(f64),
    Flush,
}

#[derive(Debug)]
enum Signal {
    Ready,
    Failed(DecoderError),
}

/// Handed to the decoder so it can report progress back to the feed.
#[derive(Debug, Clone)]
pub struct DecoderSignal {
    tx: mpsc::UnboundedSender<Signal>,
}

impl DecoderSignal {
    /// A signal tied to no feed. Reports go nowhere; for running a decoder
    /// on its own.
    pub fn detached() -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// The decoder drained part of its queue.
    pub fn ready(&self) {
        let _ = self.tx.send(Signal::Ready);
    }

    /// The decoder cannot continue.
    pub fn failed(&self, error: DecoderError) {
        let _ = self.tx.send(Signal::Failed(error));
    }
}

/// Handle to a running feed task. The task ends once every handle is
/// dropped.
#[derive(Debug, Clone)]
pub struct VideoFeed {
    tx: mpsc::UnboundedSender<FeedMessage>,
    stats: watch::Receiver<FeedStats>,
}

impl VideoFeed {
    /// Build the decoder with its signal handle and start the feed task.
    pub fn spawn<D, F>(config: SchedulerConfig, make_decoder: F) -> (Self, JoinHandle<()>)
    where
        D: VideoDecoder + 'static,
        F: FnOnce(DecoderSignal) -> D,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let decoder = make_decoder(DecoderSignal { tx: signal_tx });
        let scheduler = VideoFeedScheduler::new(decoder, config);
        let (stats_tx, stats) = watch::channel(scheduler.stats());

        let handle = tokio::spawn(run_feed(scheduler, rx, signal_rx, stats_tx));
        (Self { tx, stats }, handle)
    }

    pub fn push_chunk(&self, chunk: Bytes) {
        self.post(FeedMessage::Chunk(chunk));
    }

    pub fn set_latency_target(&self, seconds: f64) {
        self.post(FeedMessage::LatencyTarget(seconds));
    }

    pub fn set_frame_rate(&self, fps: f64) {
        self.post(FeedMessage::FrameRate(fps));
    }

    pub fn flush(&self) {
        self.post(FeedMessage::Flush);
    }

    /// Latest counters published by the task.
    pub fn stats(&self) -> FeedStats {
        *self.stats.borrow()
    }

    pub fn watch_stats(&self) -> watch::Receiver<FeedStats> {
        self.stats.clone()
    }

    fn post(&self, message: FeedMessage) {
        if self.tx.send(message).is_err() {
            debug!("video feed task has stopped");
        }
    }
}

async fn run_feed<D: VideoDecoder>(
    mut scheduler: VideoFeedScheduler<D>,
    mut rx: mpsc::UnboundedReceiver<FeedMessage>,
    mut signals: mpsc::UnboundedReceiver<Signal>,
    stats: watch::Sender<FeedStats>,
) {
    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(FeedMessage::Chunk(chunk)) => scheduler.enqueue(chunk),
                Some(FeedMessage::LatencyTarget(seconds)) => scheduler.set_latency_target(seconds),
                Some(FeedMessage::FrameRate(fps)) => scheduler.set_frame_rate(fps),
                Some(FeedMessage::Flush) => scheduler.flush(),
                None => break,
            },
            Some(signal) = signals.recv() => match signal {
                Signal::Ready => scheduler.on_decoder_ready(),
                Signal::Failed(error) => scheduler.on_decoder_error(error),
            },
        }
        stats.send_replace(scheduler.stats());
    }
    debug!("video feed stopped");
}
