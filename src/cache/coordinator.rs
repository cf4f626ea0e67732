//! Query execution and slot lifecycle.
//!
//! The coordinator owns the result slots and routes every read through the
//! configured cache policy: serve from a fresh slot, join an in-flight fetch
//! for the same key, or issue a new one. Completed responses are normalized
//! into the entity store, recorded in the dependency registry, and fanned out
//! to every subscribed query whose view they changed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::{counter, histogram};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::client::Fetcher;
use crate::config::CacheSettings;
use crate::error::QueryError;
use crate::telemetry::{
    METRIC_DEDUP_JOIN_TOTAL, METRIC_FETCH_MS, METRIC_REFETCH_TOTAL, METRIC_SLOT_HIT_TOTAL,
    METRIC_SLOT_MISS_TOTAL, METRIC_SLOT_SWEPT_TOTAL, METRIC_STALE_DROP_TOTAL,
};

use super::keys::{EntityKey, QueryKey};
use super::lock::{mutex_lock, rw_read, rw_write};
use super::normalize::{EntitySchema, denormalize, normalize, prune_removed};
use super::registry::DependencyRegistry;
use super::slot::{FetchOrigin, ResultSlot, SlotSnapshot, SlotStatus};
use super::store::EntityStore;
use super::subscription::{SubscriberCallback, SubscriptionBridge, SubscriptionHandle};

const SOURCE: &str = "cache::coordinator";

/// How a query balances cached data against network freshness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Serve a fresh slot without fetching; fetch only on miss.
    #[default]
    CacheFirst,
    /// Serve cached data immediately (even stale), revalidate in background.
    CacheAndNetwork,
    /// Always fetch; the result is still written back to the cache.
    NetworkOnly,
}

/// Per-call query options.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub policy: CachePolicy,
    /// Freshness window override; `None` falls back to the configured one.
    pub stale_time: Option<std::time::Duration>,
}

impl QueryOptions {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            stale_time: None,
        }
    }

    pub fn with_stale_time(mut self, stale_time: std::time::Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }
}

/// Outcome of one query call.
///
/// `data` is the denormalized view; on error it still carries the last known
/// good data when the slot has any, so callers can render something.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub key: QueryKey,
    pub data: Option<Value>,
    pub error: Option<QueryError>,
}

impl QueryResponse {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

type SharedFetch = Shared<BoxFuture<'static, QueryResponse>>;
type AuthHandler = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct QueryCoordinator {
    settings: CacheSettings,
    schema: EntitySchema,
    store: Arc<EntityStore>,
    registry: Arc<DependencyRegistry>,
    bridge: Arc<SubscriptionBridge>,
    slots: Mutex<HashMap<QueryKey, ResultSlot>>,
    /// In-flight fetches by key; joining one is the de-duplication path.
    inflight: Mutex<HashMap<QueryKey, SharedFetch>>,
    /// Monotonic issuance counter backing the per-slot sequence guard.
    issuance: AtomicU64,
    auth_handler: RwLock<Option<AuthHandler>>,
}

impl QueryCoordinator {
    pub fn new(
        settings: CacheSettings,
        schema: EntitySchema,
        store: Arc<EntityStore>,
        registry: Arc<DependencyRegistry>,
        bridge: Arc<SubscriptionBridge>,
    ) -> Self {
        Self {
            settings,
            schema,
            store,
            registry,
            bridge,
            slots: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            issuance: AtomicU64::new(0),
            auth_handler: RwLock::new(None),
        }
    }

    pub fn set_auth_handler(&self, handler: AuthHandler) {
        *rw_write(&self.auth_handler, SOURCE, "set_auth_handler") = Some(handler);
    }

    pub(crate) fn handle_auth_error(&self) {
        let handler = rw_read(&self.auth_handler, SOURCE, "handle_auth_error").clone();
        if let Some(handler) = handler {
            warn!("Auth failure routed to registered handler");
            handler();
        }
    }

    /// Execute one query under the requested policy.
    pub async fn query(
        self: &Arc<Self>,
        operation: &str,
        variables: Value,
        fetcher: Arc<dyn Fetcher>,
        options: QueryOptions,
    ) -> QueryResponse {
        let key = QueryKey::encode(operation, &variables);
        let stale_time = options.stale_time.or_else(|| self.settings.stale_time());
        let origin = FetchOrigin {
            operation: operation.to_string(),
            variables,
            fetcher,
        };

        match options.policy {
            CachePolicy::CacheFirst => {
                if let Some(data) = self.fresh_view(&key, stale_time) {
                    counter!(METRIC_SLOT_HIT_TOTAL).increment(1);
                    debug!(key = %key, "Query served from cache");
                    return QueryResponse {
                        key,
                        data: Some(data),
                        error: None,
                    };
                }
                counter!(METRIC_SLOT_MISS_TOTAL).increment(1);
                self.join_or_spawn(key, origin).await
            }
            CachePolicy::CacheAndNetwork => {
                let cached = self.peek(&key);
                let fetch = self.join_or_spawn(key.clone(), origin);
                match cached {
                    Some(data) => {
                        counter!(METRIC_SLOT_HIT_TOTAL).increment(1);
                        debug!(key = %key, "Cached data served, revalidating in background");
                        tokio::spawn(fetch);
                        QueryResponse {
                            key,
                            data: Some(data),
                            error: None,
                        }
                    }
                    None => {
                        counter!(METRIC_SLOT_MISS_TOTAL).increment(1);
                        fetch.await
                    }
                }
            }
            CachePolicy::NetworkOnly => {
                counter!(METRIC_SLOT_MISS_TOTAL).increment(1);
                self.join_or_spawn(key, origin).await
            }
        }
    }

    /// Join an in-flight fetch for the key, or start one.
    ///
    /// The returned future is shared: every concurrent caller for the same
    /// key awaits the single underlying request.
    pub(crate) fn join_or_spawn(self: &Arc<Self>, key: QueryKey, origin: FetchOrigin) -> SharedFetch {
        let mut inflight = mutex_lock(&self.inflight, SOURCE, "join_or_spawn");
        if let Some(existing) = inflight.get(&key) {
            counter!(METRIC_DEDUP_JOIN_TOTAL).increment(1);
            debug!(key = %key, "Joined in-flight fetch");
            return existing.clone();
        }

        let seq = self.issuance.fetch_add(1, Ordering::SeqCst) + 1;
        let coordinator = Arc::clone(self);
        let fut_key = key.clone();
        let fetch = async move {
            coordinator.begin_pending(&fut_key, origin.clone());

            let started = Instant::now();
            let result = origin.fetcher.fetch(&origin.operation, &origin.variables).await;
            histogram!(METRIC_FETCH_MS).record(started.elapsed().as_secs_f64() * 1000.0);

            let response = coordinator.complete(fut_key.clone(), seq, result);
            mutex_lock(&coordinator.inflight, SOURCE, "fetch.cleanup").remove(&fut_key);
            response
        }
        .boxed()
        .shared();

        inflight.insert(key, fetch.clone());
        fetch
    }

    /// Move the slot to `Pending` and tell subscribers a fetch started.
    fn begin_pending(&self, key: &QueryKey, origin: FetchOrigin) {
        let now = OffsetDateTime::now_utc();
        {
            let mut slots = mutex_lock(&self.slots, SOURCE, "begin_pending");
            let slot = slots
                .entry(key.clone())
                .or_insert_with(|| ResultSlot::new(now));
            slot.begin_fetch(origin);
        }
        self.notify_key(key);
    }

    /// Apply a completed fetch: write back, record dependencies, fan out.
    fn complete(
        self: &Arc<Self>,
        key: QueryKey,
        seq: u64,
        result: Result<Value, QueryError>,
    ) -> QueryResponse {
        let now = OffsetDateTime::now_utc();
        let data = match result {
            Ok(data) => data,
            Err(err) => {
                if err.is_auth() {
                    self.handle_auth_error();
                }
                return self.fail(key, seq, err, now);
            }
        };

        let normalized = match normalize(&self.schema, &data) {
            Ok(normalized) => normalized,
            Err(err) => return self.fail(key, seq, err, now),
        };

        let mut changed = HashSet::new();
        for (entity, fields) in &normalized.writes {
            if self.store.upsert(entity, fields) {
                changed.insert(entity.clone());
            }
        }

        let superseded = {
            let mut slots = mutex_lock(&self.slots, SOURCE, "complete");
            let slot = slots
                .entry(key.clone())
                .or_insert_with(|| ResultSlot::new(now));
            if slot.supersedes(seq) {
                true
            } else {
                slot.apply_success(normalized.shape.clone(), seq, now);
                false
            }
        };

        if superseded {
            counter!(METRIC_STALE_DROP_TOTAL).increment(1);
            debug!(key = %key, seq, "Superseded response dropped");
            let data = self.peek(&key);
            return QueryResponse {
                key,
                data,
                error: None,
            };
        }

        self.registry.record(&key, normalized.touched());

        let view = denormalize(&self.store, &normalized.shape);
        self.notify_key(&key);
        self.notify_dependents(&changed, Some(&key));

        QueryResponse {
            key,
            data: view,
            error: None,
        }
    }

    fn fail(&self, key: QueryKey, seq: u64, error: QueryError, now: OffsetDateTime) -> QueryResponse {
        let superseded = {
            let mut slots = mutex_lock(&self.slots, SOURCE, "fail");
            let slot = slots
                .entry(key.clone())
                .or_insert_with(|| ResultSlot::new(now));
            if slot.supersedes(seq) {
                true
            } else {
                slot.apply_error(error.clone(), seq, now);
                false
            }
        };

        if superseded {
            counter!(METRIC_STALE_DROP_TOTAL).increment(1);
            debug!(key = %key, seq, "Superseded failure dropped");
            let data = self.peek(&key);
            return QueryResponse {
                key,
                data,
                error: None,
            };
        }

        warn!(key = %key, error = %error, "Query fetch failed");
        self.notify_key(&key);
        QueryResponse {
            data: self.peek(&key),
            error: Some(error),
            key,
        }
    }

    /// Denormalized view of a fresh slot, or `None` on miss/stale.
    fn fresh_view(&self, key: &QueryKey, stale_time: Option<std::time::Duration>) -> Option<Value> {
        let now = OffsetDateTime::now_utc();
        let shape = {
            let slots = mutex_lock(&self.slots, SOURCE, "fresh_view");
            slots
                .get(key)
                .filter(|slot| slot.is_fresh(stale_time, now))
                .and_then(|slot| slot.shape.clone())
        };
        shape.and_then(|shape| denormalize(&self.store, &shape))
    }

    /// Last known data for a key regardless of freshness or status.
    pub fn peek(&self, key: &QueryKey) -> Option<Value> {
        let shape = {
            let slots = mutex_lock(&self.slots, SOURCE, "peek");
            slots.get(key).and_then(|slot| slot.shape.clone())
        };
        shape.and_then(|shape| denormalize(&self.store, &shape))
    }

    /// Point-in-time snapshot of a slot (an `Empty` one for unknown keys).
    pub fn snapshot(&self, key: &QueryKey) -> SlotSnapshot {
        let (status, shape, error, is_stale, last_fetched_at) = {
            let slots = mutex_lock(&self.slots, SOURCE, "snapshot");
            match slots.get(key) {
                Some(slot) => (
                    slot.status,
                    slot.shape.clone(),
                    slot.error.clone(),
                    slot.is_stale,
                    slot.last_fetched_at,
                ),
                None => (SlotStatus::Empty, None, None, false, None),
            }
        };
        SlotSnapshot {
            key: key.clone(),
            status,
            data: shape.and_then(|shape| denormalize(&self.store, &shape)),
            error,
            is_stale,
            last_fetched_at,
        }
    }

    fn notify_key(&self, key: &QueryKey) {
        let snapshot = self.snapshot(key);
        self.bridge.notify(&snapshot);
    }

    /// Notify every query whose cached view references a changed entity.
    pub(crate) fn notify_dependents(&self, changed: &HashSet<EntityKey>, skip: Option<&QueryKey>) {
        let mut keys: HashSet<QueryKey> = HashSet::new();
        for entity in changed {
            keys.extend(self.registry.dependents_of(entity));
        }
        if let Some(skip) = skip {
            keys.remove(skip);
        }
        for key in keys {
            self.notify_key(&key);
        }
    }

    /// Register a subscriber; its callback immediately receives the current
    /// snapshot, then every subsequent transition.
    pub fn subscribe(
        self: &Arc<Self>,
        key: &QueryKey,
        callback: SubscriberCallback,
    ) -> SubscriptionHandle {
        let (id, alive) = self.bridge.attach(key, Arc::clone(&callback));
        {
            let now = OffsetDateTime::now_utc();
            let mut slots = mutex_lock(&self.slots, SOURCE, "subscribe");
            slots
                .entry(key.clone())
                .or_insert_with(|| ResultSlot::new(now))
                .retain_subscriber();
        }
        callback(self.snapshot(key));
        SubscriptionHandle::new(key.clone(), id, alive, Arc::clone(self))
    }

    pub(crate) fn detach_subscriber(&self, key: &QueryKey, id: u64) {
        self.bridge.detach(key, id);
        let now = OffsetDateTime::now_utc();
        let mut slots = mutex_lock(&self.slots, SOURCE, "detach_subscriber");
        if let Some(slot) = slots.get_mut(key) {
            slot.release_subscriber(now);
        }
    }

    /// Re-issue the fetch that last populated a slot.
    ///
    /// Returns `None` when the key has never been fetched (no origin).
    pub fn refetch(self: &Arc<Self>, key: &QueryKey) -> Option<SharedFetch> {
        let origin = {
            let slots = mutex_lock(&self.slots, SOURCE, "refetch");
            slots.get(key).and_then(|slot| slot.origin.clone())
        }?;
        counter!(METRIC_REFETCH_TOTAL).increment(1);
        Some(self.join_or_spawn(key.clone(), origin))
    }

    /// Mark every slot of the named operations stale; slots that still have
    /// subscribers are re-fetched immediately when `eager` is set, the rest
    /// wait for their next read.
    pub(crate) fn invalidate_operations(
        self: &Arc<Self>,
        operations: &[String],
        eager: bool,
    ) -> usize {
        let mut to_refetch = Vec::new();
        {
            let mut slots = mutex_lock(&self.slots, SOURCE, "invalidate_operations");
            for (key, slot) in slots.iter_mut() {
                if !operations.iter().any(|op| op == key.operation()) {
                    continue;
                }
                slot.mark_stale();
                if eager && slot.subscribers > 0 {
                    if let Some(origin) = slot.origin.clone() {
                        to_refetch.push((key.clone(), origin));
                    }
                }
            }
        }

        let count = to_refetch.len();
        for (key, origin) in to_refetch {
            counter!(METRIC_REFETCH_TOTAL).increment(1);
            debug!(key = %key, "Eager refetch after invalidation");
            tokio::spawn(self.join_or_spawn(key, origin));
        }
        count
    }

    /// Remove entities from the store and prune them out of every cached
    /// view that referenced them (with `totalCount` fixups), then notify.
    pub(crate) fn remove_entities(&self, removed: &HashSet<EntityKey>) -> HashSet<QueryKey> {
        let mut affected: HashSet<QueryKey> = HashSet::new();
        for entity in removed {
            self.store.remove(entity);
            affected.extend(self.registry.forget_entity(entity));
        }

        {
            let mut slots = mutex_lock(&self.slots, SOURCE, "remove_entities");
            for key in &affected {
                if let Some(shape) = slots.get_mut(key).and_then(|slot| slot.shape.as_mut()) {
                    prune_removed(shape, removed);
                }
            }
        }

        for key in &affected {
            self.notify_key(key);
        }
        affected
    }

    /// Drop unsubscribed slots idle beyond the retention window.
    pub fn sweep(&self) -> usize {
        let retention = self.settings.slot_retention();
        let now = OffsetDateTime::now_utc();

        let expired: Vec<QueryKey> = {
            let inflight = mutex_lock(&self.inflight, SOURCE, "sweep.inflight");
            let slots = mutex_lock(&self.slots, SOURCE, "sweep.scan");
            slots
                .iter()
                .filter(|(key, slot)| {
                    slot.is_expired(retention, now) && !inflight.contains_key(key)
                })
                .map(|(key, _)| key.clone())
                .collect()
        };

        if expired.is_empty() {
            return 0;
        }

        {
            let mut slots = mutex_lock(&self.slots, SOURCE, "sweep.remove");
            for key in &expired {
                slots.remove(key);
            }
        }
        for key in &expired {
            self.registry.forget_key(key);
        }

        counter!(METRIC_SLOT_SWEPT_TOTAL).increment(expired.len() as u64);
        debug!(swept = expired.len(), "Retention sweep removed idle slots");
        expired.len()
    }

    pub fn slot_count(&self) -> usize {
        mutex_lock(&self.slots, SOURCE, "slot_count").len()
    }

    #[cfg(test)]
    pub(crate) fn slot_status(&self, key: &QueryKey) -> SlotStatus {
        mutex_lock(&self.slots, SOURCE, "slot_status")
            .get(key)
            .map_or(SlotStatus::Empty, |slot| slot.status)
    }

    #[cfg(test)]
    pub(crate) fn force_idle_since(&self, key: &QueryKey, at: OffsetDateTime) {
        if let Some(slot) = mutex_lock(&self.slots, SOURCE, "force_idle_since").get_mut(key) {
            slot.idle_since = at;
        }
    }
}
