//! Local input capture → coalesced protocol deltas.
//!
//! Raw pointer, button, key and wheel events are folded into one
//! [`InputDelta`] and flushed to the host on a fixed tick, so the wire
//! carries at most one input packet per tick however busy the input is.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::network::TransportSession;
use crate::packet::{InputDelta, Packet};

/// Interval between input packets.
pub const INPUT_TICK: Duration = Duration::from_nanos(1_000_000_000 / 60);

/// Wheel units per scroll step sent to the host.
const WHEEL_DIVISOR: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Primary,
    Secondary,
    Middle,
    Other(u8),
}

/// One local input event, in screen conventions (y grows downward).
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    MouseMove { dx: f32, dy: f32 },
    MouseDown(MouseButton),
    MouseUp(MouseButton),
    KeyDown(String),
    KeyUp(String),
    Wheel { delta_y: f32 },
}

/// Folds input events into a single pending [`InputDelta`].
#[derive(Debug, Default)]
pub struct InputAggregator {
    pending: InputDelta,
}

impl InputAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: InputEvent) {
        match event {
            InputEvent::MouseMove { dx, dy } => self.on_mouse_move(dx, dy),
            InputEvent::MouseDown(button) => self.on_mouse_down(button),
            InputEvent::MouseUp(button) => self.on_mouse_up(button),
            InputEvent::KeyDown(key) => self.on_key_down(key),
            InputEvent::KeyUp(key) => self.on_key_up(key),
            InputEvent::Wheel { delta_y } => self.on_wheel(delta_y),
        }
    }

    /// Accumulate relative motion. The host expects y-up, so vertical
    /// motion is inverted.
    pub fn on_mouse_move(&mut self, dx: f32, dy: f32) {
        self.pending.dx += dx;
        self.pending.dy -= dy;
    }

    /// Only the primary button is forwarded.
    pub fn on_mouse_down(&mut self, button: MouseButton) {
        if button == MouseButton::Primary {
            self.pending.mouse_down = true;
        }
    }

    pub fn on_mouse_up(&mut self, button: MouseButton) {
        if button == MouseButton::Primary {
            self.pending.mouse_up = true;
        }
    }

    pub fn on_key_down(&mut self, key: impl Into<String>) {
        self.pending.keys_down.push(key.into());
    }

    pub fn on_key_up(&mut self, key: impl Into<String>) {
        self.pending.keys_up.push(key.into());
    }

    pub fn on_wheel(&mut self, delta_y: f32) {
        self.pending.scroll -= delta_y / WHEEL_DIVISOR;
    }

    /// Take the pending delta, leaving the aggregator empty. `None` when
    /// nothing happened since the last take.
    pub fn take(&mut self) -> Option<InputDelta> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    pub fn clear(&mut self) {
        self.pending = InputDelta::default();
    }
}

// ── InputCapture ─────────────────────────────────────────────────

enum CaptureMessage {
    Event(InputEvent),
    Start,
    Stop,
}

/// Tick context: owns an aggregator and sends its pending delta through the
/// session every tick while capture is active.
///
/// Capture mirrors exclusive pointer capture on the host window: events
/// arriving while stopped are ignored, and stopping discards whatever was
/// pending.
#[derive(Debug, Clone)]
pub struct InputCapture {
    tx: mpsc::UnboundedSender<CaptureMessage>,
}

impl InputCapture {
    pub fn spawn(session: TransportSession, tick: Duration) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_capture(session, tick, rx));
        (Self { tx }, handle)
    }

    pub fn start(&self) {
        let _ = self.tx.send(CaptureMessage::Start);
    }

    pub fn stop(&self) {
        let _ = self.tx.send(CaptureMessage::Stop);
    }

    pub fn event(&self, event: InputEvent) {
        let _ = self.tx.send(CaptureMessage::Event(event));
    }
}

async fn run_capture(
    session: TransportSession,
    tick: Duration,
    mut rx: mpsc::UnboundedReceiver<CaptureMessage>,
) {
    let mut aggregator = InputAggregator::new();
    let mut active = false;
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(CaptureMessage::Start) if !active => {
                    debug!("input capture started");
                    active = true;
                    ticker.reset();
                }
                Some(CaptureMessage::Stop) if active => {
                    debug!("input capture stopped");
                    active = false;
                    aggregator.clear();
                }
                Some(CaptureMessage::Event(event)) if active => aggregator.apply(event),
                Some(_) => {}
                None => break,
            },
            _ = ticker.tick(), if active => {
                if let Some(delta) = aggregator.take() {
                    trace!("sending input delta");
                    session.send(Packet::Input(delta));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesces_motion_and_inverts_y() {
        let mut agg = InputAggregator::new();
        agg.on_mouse_move(3.0, 4.0);
        agg.on_mouse_move(-1.0, 2.0);

        let delta = agg.take().unwrap();
        assert_eq!(delta.dx, 2.0);
        assert_eq!(delta.dy, -6.0);
        assert!(agg.take().is_none());
    }

    #[test]
    fn keys_keep_order() {
        let mut agg = InputAggregator::new();
        agg.on_key_down("KeyW");
        agg.on_key_down("ShiftLeft");
        agg.on_key_up("KeyW");

        let delta = agg.take().unwrap();
        assert_eq!(delta.keys_down, vec!["KeyW", "ShiftLeft"]);
        assert_eq!(delta.keys_up, vec!["KeyW"]);
    }

    #[test]
    fn only_primary_button_counts() {
        let mut agg = InputAggregator::new();
        agg.on_mouse_down(MouseButton::Secondary);
        agg.on_mouse_up(MouseButton::Middle);
        assert!(agg.take().is_none());

        agg.apply(InputEvent::MouseDown(MouseButton::Primary));
        agg.apply(InputEvent::MouseUp(MouseButton::Primary));
        let delta = agg.take().unwrap();
        assert!(delta.mouse_down && delta.mouse_up);
    }

    #[test]
    fn wheel_scales_and_inverts() {
        let mut agg = InputAggregator::new();
        agg.apply(InputEvent::Wheel { delta_y: 100.0 });
        agg.apply(InputEvent::Wheel { delta_y: 50.0 });
        assert_eq!(agg.take().unwrap().scroll, -3.0);
    }

    #[test]
    fn empty_tick_sends_nothing() {
        let mut agg = InputAggregator::new();
        agg.on_mouse_move(0.0, 0.0);
        assert!(agg.take().is_none());
    }

    #[test]
    fn tick_is_sixty_hertz() {
        let per_second = Duration::from_secs(1).as_nanos() / INPUT_TICK.as_nanos();
        assert_eq!(per_second, 60);
    }
}
