//! Mutation execution and cache invalidation.
//!
//! Mutations run through the network unconditionally. Their declared effects
//! drive the cache afterwards: entities returned in the response are merged
//! into the store (updating every dependent view), removed entities are
//! pruned out of cached views with count fixups, and named operations are
//! marked stale so their next read re-fetches.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::Fetcher;
use crate::config::CacheSettings;
use crate::error::QueryError;
use crate::telemetry::METRIC_FETCH_MS;

use super::coordinator::QueryCoordinator;
use super::keys::EntityKey;
use super::normalize::{EntitySchema, normalize};
use super::store::EntityStore;

/// Declared cache consequences of a mutation.
///
/// Effects are declared by the caller alongside the operation, not inferred
/// from the response, so a delete can invalidate list queries whose items the
/// response never mentions.
#[derive(Debug, Clone, Default)]
pub struct MutationEffects {
    /// Entities to remove from the store and prune from cached views.
    pub removes: Vec<EntityKey>,
    /// Operations whose slots go stale (all variable combinations).
    pub stale_operations: Vec<String>,
}

impl MutationEffects {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn remove(mut self, entity: EntityKey) -> Self {
        self.removes.push(entity);
        self
    }

    pub fn stale_operation(mut self, operation: impl Into<String>) -> Self {
        self.stale_operations.push(operation.into());
        self
    }
}

/// Outcome of one mutation call.
#[derive(Debug, Clone)]
pub struct MutationResponse {
    pub data: Option<Value>,
    pub error: Option<QueryError>,
}

impl MutationResponse {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn failure(error: QueryError) -> Self {
        Self {
            data: None,
            error: Some(error),
        }
    }
}

pub(crate) struct MutationCoordinator {
    settings: CacheSettings,
    schema: EntitySchema,
    store: Arc<EntityStore>,
    queries: Arc<QueryCoordinator>,
}

impl MutationCoordinator {
    pub fn new(
        settings: CacheSettings,
        schema: EntitySchema,
        store: Arc<EntityStore>,
        queries: Arc<QueryCoordinator>,
    ) -> Self {
        Self {
            settings,
            schema,
            store,
            queries,
        }
    }

    /// Execute a mutation and apply its declared effects to the cache.
    pub async fn mutate(
        &self,
        operation: &str,
        variables: Value,
        fetcher: Arc<dyn Fetcher>,
        effects: MutationEffects,
    ) -> MutationResponse {
        debug!(operation, "Executing mutation");

        let started = Instant::now();
        let result = fetcher.fetch(operation, &variables).await;
        histogram!(METRIC_FETCH_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        let data = match result {
            Ok(data) => data,
            Err(error) => {
                if error.is_auth() {
                    self.queries.handle_auth_error();
                }
                warn!(operation, error = %error, "Mutation failed");
                return MutationResponse::failure(error);
            }
        };

        // Write back entities the response carries; failures here mean the
        // server accepted the mutation but sent a shape we cannot store.
        let normalized = match normalize(&self.schema, &data) {
            Ok(normalized) => normalized,
            Err(error) => {
                warn!(operation, error = %error, "Mutation response failed to normalize");
                return MutationResponse::failure(error);
            }
        };

        let mut changed = HashSet::new();
        for (entity, fields) in &normalized.writes {
            if self.store.upsert(entity, fields) {
                changed.insert(entity.clone());
            }
        }
        if !changed.is_empty() {
            self.queries.notify_dependents(&changed, None);
        }

        if !effects.removes.is_empty() {
            let removed: HashSet<EntityKey> = effects.removes.iter().cloned().collect();
            let affected = self.queries.remove_entities(&removed);
            debug!(
                operation,
                removed = removed.len(),
                affected = affected.len(),
                "Entities removed from cache"
            );
        }

        if !effects.stale_operations.is_empty() {
            let refetched = self
                .queries
                .invalidate_operations(&effects.stale_operations, self.settings.eager_refetch);
            debug!(operation, refetched, "Stale operations invalidated");
        }

        info!(operation, changed = changed.len(), "Mutation applied");
        MutationResponse {
            data: Some(data),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::cache::coordinator::QueryOptions;
    use crate::cache::keys::QueryKey;
    use crate::cache::slot::SlotSnapshot;
    use crate::cache::normalize::EntityMarker;
    use crate::cache::registry::DependencyRegistry;
    use crate::cache::subscription::SubscriptionBridge;

    use super::*;

    struct FixedFetcher {
        value: Value,
        calls: AtomicUsize,
    }

    impl FixedFetcher {
        fn new(value: Value) -> Arc<Self> {
            Arc::new(Self {
                value,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for FixedFetcher {
        async fn fetch(&self, _operation: &str, _variables: &Value) -> Result<Value, QueryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(self.value.clone())
        }
    }

    fn schema() -> EntitySchema {
        EntitySchema::new(vec![
            EntityMarker::new("ContentVariant", ["postId", "languageCode"]),
            EntityMarker::new("Post", ["postId"]),
        ])
    }

    fn build() -> (Arc<QueryCoordinator>, MutationCoordinator) {
        let settings = CacheSettings::default();
        let store = Arc::new(EntityStore::new());
        let queries = Arc::new(QueryCoordinator::new(
            settings.clone(),
            schema(),
            Arc::clone(&store),
            Arc::new(DependencyRegistry::new()),
            Arc::new(SubscriptionBridge::new()),
        ));
        let mutations =
            MutationCoordinator::new(settings, schema(), store, Arc::clone(&queries));
        (queries, mutations)
    }

    #[tokio::test]
    async fn update_propagates_to_cached_views() {
        let (queries, mutations) = build();

        let list = FixedFetcher::new(json!({"posts": [{"postId": 5, "title": "Old"}]}));
        queries
            .query("posts", json!({}), list, QueryOptions::default())
            .await;

        let update = FixedFetcher::new(json!({"updatePost": {"postId": 5, "title": "New"}}));
        let response = mutations
            .mutate("updatePost", json!({"id": 5, "title": "New"}), update, MutationEffects::none())
            .await;
        assert!(response.is_ok());

        let key = QueryKey::encode("posts", &json!({}));
        let view = queries.peek(&key).expect("cached view");
        assert_eq!(view, json!({"posts": [{"postId": 5, "title": "New"}]}));
    }

    #[tokio::test]
    async fn delete_prunes_views_and_decrements_total_count() {
        let (queries, mutations) = build();

        let page = FixedFetcher::new(json!({
            "postsPaginated": {
                "page": 1,
                "pageSize": 12,
                "totalPages": 2,
                "totalCount": 20,
                "items": [{"postId": 5, "title": "Bye"}, {"postId": 6, "title": "Stay"}]
            }
        }));
        queries
            .query("postsPaginated", json!({"page": 1, "pageSize": 12}), page, QueryOptions::default())
            .await;

        let delete = FixedFetcher::new(json!({"deletePost": true}));
        let response = mutations
            .mutate(
                "deletePost",
                json!({"id": 5}),
                delete,
                MutationEffects::none().remove(EntityKey::new("Post", "5")),
            )
            .await;
        assert!(response.is_ok());

        let key = QueryKey::encode("postsPaginated", &json!({"page": 1, "pageSize": 12}));
        let view = queries.peek(&key).expect("cached view");
        assert_eq!(view["postsPaginated"]["totalCount"], json!(19));
        assert_eq!(
            view["postsPaginated"]["items"],
            json!([{"postId": 6, "title": "Stay"}])
        );
    }

    #[tokio::test]
    async fn stale_operation_with_subscriber_is_eagerly_refetched() {
        let (queries, mutations) = build();
        let key = QueryKey::encode("posts", &json!({}));

        let list = FixedFetcher::new(json!({"posts": [{"postId": 1, "title": "One"}]}));
        queries
            .query("posts", json!({}), list.clone(), QueryOptions::default())
            .await;
        let _handle = queries.subscribe(&key, Arc::new(|_: SlotSnapshot| {}));

        let create = FixedFetcher::new(json!({"createPost": {"postId": 2, "title": "Two"}}));
        mutations
            .mutate(
                "createPost",
                json!({"title": "Two"}),
                create,
                MutationEffects::none().stale_operation("posts"),
            )
            .await;

        // The eager refetch runs on a spawned task.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(list.calls(), 2);
    }

    #[tokio::test]
    async fn stale_operation_without_subscriber_waits_for_next_read() {
        let (queries, mutations) = build();

        let list = FixedFetcher::new(json!({"posts": [{"postId": 1, "title": "One"}]}));
        queries
            .query("posts", json!({}), list.clone(), QueryOptions::default())
            .await;

        let create = FixedFetcher::new(json!({"createPost": {"postId": 2, "title": "Two"}}));
        mutations
            .mutate(
                "createPost",
                json!({"title": "Two"}),
                create,
                MutationEffects::none().stale_operation("posts"),
            )
            .await;

        tokio::task::yield_now().await;
        assert_eq!(list.calls(), 1);

        // The stale slot no longer satisfies cache-first.
        queries
            .query("posts", json!({}), list.clone(), QueryOptions::default())
            .await;
        assert_eq!(list.calls(), 2);
    }

    #[tokio::test]
    async fn failed_mutation_leaves_cache_untouched() {
        let (queries, mutations) = build();

        struct Failing;
        #[async_trait]
        impl Fetcher for Failing {
            async fn fetch(&self, _op: &str, _vars: &Value) -> Result<Value, QueryError> {
                Err(QueryError::transport("down"))
            }
        }

        let list = FixedFetcher::new(json!({"posts": [{"postId": 1, "title": "One"}]}));
        queries
            .query("posts", json!({}), list, QueryOptions::default())
            .await;

        let response = mutations
            .mutate(
                "deletePost",
                json!({"id": 1}),
                Arc::new(Failing),
                MutationEffects::none().remove(EntityKey::new("Post", "1")),
            )
            .await;

        assert!(!response.is_ok());
        let key = QueryKey::encode("posts", &json!({}));
        // The post is still cached; the removal effect never ran.
        let view = queries.peek(&key).expect("cached view");
        assert_eq!(view["posts"][0]["title"], json!("One"));
    }

    #[tokio::test]
    async fn dependents_are_notified_of_mutation_writes() {
        let (queries, mutations) = build();
        let key = QueryKey::encode("posts", &json!({}));

        let list = FixedFetcher::new(json!({"posts": [{"postId": 5, "title": "Old"}]}));
        queries
            .query("posts", json!({}), list, QueryOptions::default())
            .await;

        let titles = Arc::new(Mutex::new(Vec::new()));
        let _handle = {
            let titles = Arc::clone(&titles);
            queries.subscribe(
                &key,
                Arc::new(move |snapshot: SlotSnapshot| {
                    if let Some(title) = snapshot
                        .data
                        .as_ref()
                        .and_then(|d| d["posts"][0]["title"].as_str())
                    {
                        titles.lock().unwrap().push(title.to_string());
                    }
                }),
            )
        };

        let update = FixedFetcher::new(json!({"updatePost": {"postId": 5, "title": "New"}}));
        mutations
            .mutate("updatePost", json!({"id": 5, "title": "New"}), update, MutationEffects::none())
            .await;

        let seen = titles.lock().unwrap().clone();
        assert_eq!(seen, vec!["Old".to_string(), "New".to_string()]);
    }
}
