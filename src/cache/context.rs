//! The cache instance handed to the application.
//!
//! `CacheContext` wires the store, registry, subscription bridge, and the
//! query/mutation coordinators together. It is an explicit instance rather
//! than a process-wide singleton: tests and embedders create as many
//! independent caches as they need, each with its own settings and schema.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::info;

use crate::client::Fetcher;
use crate::config::CacheSettings;
use crate::telemetry;

use super::coordinator::{QueryCoordinator, QueryOptions, QueryResponse};
use super::debounce::Debouncer;
use super::keys::{EntityKey, QueryKey};
use super::mutation::{MutationCoordinator, MutationEffects, MutationResponse};
use super::normalize::EntitySchema;
use super::registry::DependencyRegistry;
use super::slot::SlotSnapshot;
use super::store::EntityStore;
use super::subscription::{SubscriberCallback, SubscriptionBridge, SubscriptionHandle};

#[derive(Clone)]
pub struct CacheContext {
    settings: CacheSettings,
    queries: Arc<QueryCoordinator>,
    mutations: Arc<MutationCoordinator>,
    store: Arc<EntityStore>,
}

impl CacheContext {
    pub fn new(settings: CacheSettings, schema: EntitySchema) -> Self {
        telemetry::describe_metrics();

        let store = Arc::new(EntityStore::new());
        let registry = Arc::new(DependencyRegistry::new());
        let bridge = Arc::new(SubscriptionBridge::new());
        let queries = Arc::new(QueryCoordinator::new(
            settings.clone(),
            schema.clone(),
            Arc::clone(&store),
            registry,
            bridge,
        ));
        let mutations = Arc::new(MutationCoordinator::new(
            settings.clone(),
            schema,
            Arc::clone(&store),
            Arc::clone(&queries),
        ));

        info!(
            stale_time_ms = settings.stale_time_ms,
            slot_retention_ms = settings.slot_retention_ms,
            "Cache context created"
        );
        Self {
            settings,
            queries,
            mutations,
            store,
        }
    }

    pub fn with_defaults(schema: EntitySchema) -> Self {
        Self::new(CacheSettings::default(), schema)
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Execute a query under the requested cache policy.
    pub async fn query(
        &self,
        operation: &str,
        variables: Value,
        fetcher: Arc<dyn Fetcher>,
        options: QueryOptions,
    ) -> QueryResponse {
        self.queries.query(operation, variables, fetcher, options).await
    }

    /// Execute a mutation and apply its declared cache effects.
    pub async fn mutate(
        &self,
        operation: &str,
        variables: Value,
        fetcher: Arc<dyn Fetcher>,
        effects: MutationEffects,
    ) -> MutationResponse {
        self.mutations.mutate(operation, variables, fetcher, effects).await
    }

    /// Observe a query key; the callback immediately receives the current
    /// snapshot, then every subsequent slot transition.
    pub fn subscribe(&self, key: &QueryKey, callback: SubscriberCallback) -> SubscriptionHandle {
        self.queries.subscribe(key, callback)
    }

    /// Last known data for a key, regardless of freshness.
    pub fn peek(&self, key: &QueryKey) -> Option<Value> {
        self.queries.peek(key)
    }

    pub fn snapshot(&self, key: &QueryKey) -> SlotSnapshot {
        self.queries.snapshot(key)
    }

    /// Re-issue the fetch that last populated a key; `None` when the key has
    /// never been fetched.
    pub async fn refetch(&self, key: &QueryKey) -> Option<QueryResponse> {
        match self.queries.refetch(key) {
            Some(fetch) => Some(fetch.await),
            None => None,
        }
    }

    /// Current record for an entity, when cached.
    pub fn entity(&self, key: &EntityKey) -> Option<serde_json::Map<String, Value>> {
        self.store.get(key)
    }

    /// Register the handler invoked on any `Auth` error (typically: clear
    /// stored credentials and route to a login screen).
    pub fn on_auth_error(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.queries.set_auth_handler(Arc::new(handler));
    }

    /// A debouncer using the configured quiescence window.
    pub fn debouncer(&self) -> Debouncer {
        Debouncer::new(self.settings.debounce_window())
    }

    /// Run one retention sweep; returns the number of slots removed.
    pub fn sweep(&self) -> usize {
        self.queries.sweep()
    }

    /// Spawn the periodic retention sweep loop.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let queries = Arc::clone(&self.queries);
        let interval = self.settings.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                queries.sweep();
            }
        })
    }
}
