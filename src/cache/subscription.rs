//! Slot subscription bookkeeping.
//!
//! Subscribers register a callback per query key and receive a snapshot on
//! every slot transition. Each subscriber carries a liveness flag that is
//! flipped before detach, so a callback is never invoked after its handle has
//! been released even if a notification was already being dispatched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::coordinator::QueryCoordinator;
use super::keys::QueryKey;
use super::lock::mutex_lock;
use super::slot::SlotSnapshot;

const SOURCE: &str = "cache::subscription";

/// Callback invoked with a snapshot on every transition of the observed slot.
pub type SubscriberCallback = Arc<dyn Fn(SlotSnapshot) + Send + Sync>;

struct Subscriber {
    id: u64,
    alive: Arc<AtomicBool>,
    callback: SubscriberCallback,
}

/// Routes slot snapshots to the callbacks observing each query key.
pub(crate) struct SubscriptionBridge {
    subscribers: Mutex<HashMap<QueryKey, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl SubscriptionBridge {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback for a key; returns its id and liveness flag.
    pub fn attach(&self, key: &QueryKey, callback: SubscriberCallback) -> (u64, Arc<AtomicBool>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let alive = Arc::new(AtomicBool::new(true));
        let mut subscribers = mutex_lock(&self.subscribers, SOURCE, "attach");
        subscribers.entry(key.clone()).or_default().push(Subscriber {
            id,
            alive: Arc::clone(&alive),
            callback,
        });
        debug!(key = %key, id, "Subscriber attached");
        (id, alive)
    }

    /// Remove a subscriber; the callback will not be invoked again.
    pub fn detach(&self, key: &QueryKey, id: u64) {
        let mut subscribers = mutex_lock(&self.subscribers, SOURCE, "detach");
        if let Some(list) = subscribers.get_mut(key) {
            list.retain(|subscriber| subscriber.id != id);
            if list.is_empty() {
                subscribers.remove(key);
            }
        }
        debug!(key = %key, id, "Subscriber detached");
    }

    /// Dispatch a snapshot to every live subscriber of its key.
    ///
    /// Callbacks run after the subscriber lock has been released, so a
    /// callback may safely re-enter the cache.
    pub fn notify(&self, snapshot: &SlotSnapshot) {
        let targets: Vec<(Arc<AtomicBool>, SubscriberCallback)> = {
            let subscribers = mutex_lock(&self.subscribers, SOURCE, "notify");
            match subscribers.get(&snapshot.key) {
                Some(list) => list
                    .iter()
                    .map(|s| (Arc::clone(&s.alive), Arc::clone(&s.callback)))
                    .collect(),
                None => return,
            }
        };

        for (alive, callback) in targets {
            if alive.load(Ordering::SeqCst) {
                callback(snapshot.clone());
            }
        }
    }

    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        mutex_lock(&self.subscribers, SOURCE, "subscriber_count")
            .get(key)
            .map_or(0, Vec::len)
    }
}

/// Owned registration of one subscriber.
///
/// Dropping the handle (or calling [`unsubscribe`](Self::unsubscribe))
/// deregisters the callback and releases the slot for retention-based
/// garbage collection.
pub struct SubscriptionHandle {
    key: QueryKey,
    id: u64,
    alive: Arc<AtomicBool>,
    coordinator: Arc<QueryCoordinator>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        key: QueryKey,
        id: u64,
        alive: Arc<AtomicBool>,
        coordinator: Arc<QueryCoordinator>,
    ) -> Self {
        Self {
            key,
            id,
            alive,
            coordinator,
        }
    }

    /// The query key this handle observes.
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn unsubscribe(self) {
        self.release();
    }

    fn release(&self) {
        // The flag flip makes detach idempotent across unsubscribe + drop.
        if self.alive.swap(false, Ordering::SeqCst) {
            self.coordinator.detach_subscriber(&self.key, self.id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}
