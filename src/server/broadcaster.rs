//! Broadcaster — per-task fan-out from one live stream to N late subscribers.
//!
//! Unlike a `tokio::sync::broadcast` channel, where a slow reader that falls
//! behind the ring buffer starts missing messages for everyone downstream of
//! the wraparound, each subscriber here gets its own bounded queue. A full
//! queue only drops events for *that* subscriber; it never perturbs others or
//! the publisher.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::types::StreamResponse;

/// Default per-subscriber queue capacity.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<StreamResponse>,
}

/// Fan-out broadcaster for a single task's stream of events.
///
/// Each subscriber receives its own bounded `mpsc` channel. [`Broadcaster::send`]
/// never blocks: if a subscriber's queue is full, that event is dropped for
/// that subscriber only, and a warning is logged.
pub struct Broadcaster {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: std::sync::atomic::AtomicU64,
    closed: std::sync::atomic::AtomicBool,
    capacity: usize,
}

impl Broadcaster {
    /// Create a new broadcaster with the default subscriber queue capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Create a new broadcaster with a custom per-subscriber queue capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: std::sync::atomic::AtomicU64::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
            capacity,
        }
    }

    /// Subscribe to this broadcaster's events.
    ///
    /// Returns a subscriber id (for [`Broadcaster::unsubscribe`]) and a
    /// receiver. If the broadcaster is already closed, the returned
    /// receiver's sender half has already been dropped — the first
    /// `recv()` resolves to `None` immediately, matching the behavior a
    /// late joiner would see on a channel that closed before they
    /// subscribed.
    pub async fn subscribe(&self) -> (u64, mpsc::Receiver<StreamResponse>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        if self.closed.load(std::sync::atomic::Ordering::Acquire) {
            debug!("Subscribed to an already-closed broadcaster");
            return (id, rx);
        }

        let mut subs = self.subscribers.lock().await;
        subs.push(Subscriber { id, tx });
        (id, rx)
    }

    /// Remove a subscriber without closing the broadcaster.
    ///
    /// Called when a subscriber disconnects (e.g. an SSE client drops the
    /// connection) so its slot stops being offered events.
    pub async fn unsubscribe(&self, id: u64) {
        let mut subs = self.subscribers.lock().await;
        subs.retain(|s| s.id != id);
    }

    /// Send an event to all current subscribers.
    ///
    /// Non-blocking: a subscriber whose queue is full has this event dropped
    /// for them, logged at `warn`. Silently a no-op if the broadcaster is
    /// closed.
    pub async fn send(&self, event: StreamResponse) {
        if self.closed.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }

        let subs = self.subscribers.lock().await;
        for sub in subs.iter() {
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber_id = sub.id, "Subscriber queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(subscriber_id = sub.id, "Subscriber disconnected");
                }
            }
        }
    }

    /// Close the broadcaster, dropping all subscriber senders so every
    /// subscriber observes end-of-stream. Idempotent.
    pub async fn close(&self) {
        if self
            .closed
            .swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            return;
        }
        let mut subs = self.subscribers.lock().await;
        subs.clear();
        debug!("Broadcaster closed");
    }

    /// Whether this broadcaster has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::Acquire)
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry mapping task id to its [`Broadcaster`].
///
/// Typically one broadcaster exists per in-flight (or recently-finished,
/// until evicted) task; the streaming handler creates one when a task starts
/// and late subscribers join the same instance via [`BroadcasterRegistry::get`].
pub struct BroadcasterRegistry {
    broadcasters: Mutex<HashMap<String, Arc<Broadcaster>>>,
    capacity: usize,
}

impl BroadcasterRegistry {
    /// Create a new empty registry using the default per-subscriber capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Create a new empty registry with a custom per-subscriber capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            broadcasters: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Get the broadcaster for `task_id`, creating one if it doesn't exist.
    pub async fn get_or_create(&self, task_id: &str) -> Arc<Broadcaster> {
        let mut map = self.broadcasters.lock().await;
        map.entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Broadcaster::with_capacity(self.capacity)))
            .clone()
    }

    /// Get the broadcaster for `task_id` if one currently exists.
    pub async fn get(&self, task_id: &str) -> Option<Arc<Broadcaster>> {
        let map = self.broadcasters.lock().await;
        map.get(task_id).cloned()
    }

    /// Close and remove the broadcaster for `task_id`, if any.
    pub async fn remove(&self, task_id: &str) {
        let broadcaster = {
            let mut map = self.broadcasters.lock().await;
            map.remove(task_id)
        };
        if let Some(b) = broadcaster {
            b.close().await;
        }
    }

    /// Drop every broadcaster whose closed flag is already set.
    ///
    /// Streaming/unary handlers call [`BroadcasterRegistry::remove`] directly
    /// when a task finishes; this sweeps up any that were closed by some
    /// other path (e.g. a direct `Broadcaster::close` call) without going
    /// through the registry.
    pub async fn remove_closed(&self) -> usize {
        let mut map = self.broadcasters.lock().await;
        let before = map.len();
        map.retain(|_, b| !b.is_closed());
        before - map.len()
    }

    /// Close and remove every broadcaster. Used on server shutdown.
    pub async fn close_all(&self) {
        let mut map = self.broadcasters.lock().await;
        for (_, b) in map.drain() {
            b.close().await;
        }
    }
}

impl Default for BroadcasterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
