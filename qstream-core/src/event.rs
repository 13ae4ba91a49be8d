//! Subscribable event channels.
//!
//! Each channel keeps its subscribers keyed by a stable [`SubscriptionId`],
//! so a subscriber can remove itself (even from inside its own callback)
//! without disturbing the others.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Handle returned by [`EventChannel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Subscriber<T> {
    callback: Callback<T>,
    once: bool,
}

/// A multi-subscriber notification channel.
pub struct EventChannel<T> {
    next_id: AtomicU64,
    subscribers: Mutex<BTreeMap<u64, Subscriber<T>>>,
}

impl<T> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for EventChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl<T> EventChannel<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register a callback invoked on every emission.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.insert(Arc::new(callback), false)
    }

    /// Register a callback that is removed after its first invocation.
    pub fn subscribe_once<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.insert(Arc::new(callback), true)
    }

    /// Remove a subscriber. Returns `false` if the id was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.lock().remove(&id.0).is_some()
    }

    /// Invoke every subscriber, in subscription order.
    ///
    /// The registry lock is not held while callbacks run.
    pub fn emit(&self, event: &T) {
        let callbacks: Vec<Callback<T>> = {
            let mut subscribers = self.subscribers.lock();
            let snapshot = subscribers
                .values()
                .map(|s| Arc::clone(&s.callback))
                .collect();
            subscribers.retain(|_, s| !s.once);
            snapshot
        };
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, callback: Callback<T>, once: bool) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .insert(id, Subscriber { callback, once });
        SubscriptionId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emits_to_all_subscribers() {
        let channel = EventChannel::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let total = total.clone();
            channel.subscribe(move |v| {
                total.fetch_add(*v as usize, Ordering::SeqCst);
            });
        }
        channel.emit(&2);
        assert_eq!(total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn unsubscribe_by_id() {
        let channel = EventChannel::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        let id = channel.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        channel.emit(&());
        assert!(channel.unsubscribe(id));
        assert!(!channel.unsubscribe(id));
        channel.emit(&());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(channel.is_empty());
    }

    #[test]
    fn once_subscriber_fires_once() {
        let channel = EventChannel::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        channel.subscribe_once(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        channel.emit(&());
        channel.emit(&());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_may_unsubscribe_itself() {
        let channel = Arc::new(EventChannel::<()>::new());
        let slot = Arc::new(Mutex::new(None::<SubscriptionId>));

        let (c, s) = (channel.clone(), slot.clone());
        let id = channel.subscribe(move |_| {
            if let Some(id) = *s.lock() {
                c.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);

        channel.emit(&());
        assert!(channel.is_empty());
    }
}
