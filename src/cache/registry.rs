//! Bidirectional dependency registry.
//!
//! Records which entities each cached query view references, enabling
//! targeted cross-query invalidation without scanning every slot.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::keys::{EntityKey, QueryKey};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

/// Tracks entity → query-key and query-key → entity mappings.
pub struct DependencyRegistry {
    entity_to_keys: RwLock<HashMap<EntityKey, HashSet<QueryKey>>>,
    key_to_entities: RwLock<HashMap<QueryKey, HashSet<EntityKey>>>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self {
            entity_to_keys: RwLock::new(HashMap::new()),
            key_to_entities: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the dependency set of a query key.
    ///
    /// Called after every write-back; the previous set is discarded so keys
    /// whose fresh view no longer references an entity stop receiving its
    /// change notifications.
    pub fn record(&self, key: &QueryKey, entities: HashSet<EntityKey>) {
        let mut e2k = rw_write(&self.entity_to_keys, SOURCE, "record.e2k");
        let mut k2e = rw_write(&self.key_to_entities, SOURCE, "record.k2e");

        if let Some(previous) = k2e.remove(key) {
            for entity in previous {
                if let Some(keys) = e2k.get_mut(&entity) {
                    keys.remove(key);
                    if keys.is_empty() {
                        e2k.remove(&entity);
                    }
                }
            }
        }

        for entity in &entities {
            e2k.entry(entity.clone()).or_default().insert(key.clone());
        }
        k2e.insert(key.clone(), entities);
    }

    /// All query keys whose cached view references the entity.
    pub fn dependents_of(&self, entity: &EntityKey) -> HashSet<QueryKey> {
        rw_read(&self.entity_to_keys, SOURCE, "dependents_of")
            .get(entity)
            .cloned()
            .unwrap_or_default()
    }

    /// All entities a query key's cached view references.
    pub fn dependencies_of(&self, key: &QueryKey) -> HashSet<EntityKey> {
        rw_read(&self.key_to_entities, SOURCE, "dependencies_of")
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop all mappings for a query key (slot evicted or invalidated).
    pub fn forget_key(&self, key: &QueryKey) {
        let mut e2k = rw_write(&self.entity_to_keys, SOURCE, "forget_key.e2k");
        let mut k2e = rw_write(&self.key_to_entities, SOURCE, "forget_key.k2e");

        if let Some(entities) = k2e.remove(key) {
            for entity in entities {
                if let Some(keys) = e2k.get_mut(&entity) {
                    keys.remove(key);
                    if keys.is_empty() {
                        e2k.remove(&entity);
                    }
                }
            }
        }
    }

    /// Drop all mappings for an entity, returning the query keys that
    /// referenced it (the candidates for cascade cleanup).
    pub fn forget_entity(&self, entity: &EntityKey) -> HashSet<QueryKey> {
        let mut e2k = rw_write(&self.entity_to_keys, SOURCE, "forget_entity.e2k");
        let mut k2e = rw_write(&self.key_to_entities, SOURCE, "forget_entity.k2e");

        let affected = e2k.remove(entity).unwrap_or_default();
        for key in &affected {
            if let Some(entities) = k2e.get_mut(key) {
                // The key may still depend on other entities, so only the
                // removed entity is dropped from its set.
                entities.remove(entity);
            }
        }
        affected
    }

    pub fn clear(&self) {
        rw_write(&self.entity_to_keys, SOURCE, "clear.e2k").clear();
        rw_write(&self.key_to_entities, SOURCE, "clear.k2e").clear();
    }

    pub fn entity_count(&self) -> usize {
        rw_read(&self.entity_to_keys, SOURCE, "entity_count").len()
    }

    pub fn key_count(&self) -> usize {
        rw_read(&self.key_to_entities, SOURCE, "key_count").len()
    }
}

impl Default for DependencyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn key(op: &str, limit: u32) -> QueryKey {
        QueryKey::encode(op, &json!({ "limit": limit }))
    }

    fn entities(keys: &[EntityKey]) -> HashSet<EntityKey> {
        keys.iter().cloned().collect()
    }

    #[test]
    fn record_and_lookup_both_directions() {
        let registry = DependencyRegistry::new();
        let post = EntityKey::new("Post", "5");
        let query = key("topPosts", 12);

        registry.record(&query, entities(&[post.clone()]));

        assert!(registry.dependents_of(&post).contains(&query));
        assert!(registry.dependencies_of(&query).contains(&post));
    }

    #[test]
    fn record_replaces_previous_dependency_set() {
        let registry = DependencyRegistry::new();
        let old = EntityKey::new("Post", "1");
        let new = EntityKey::new("Post", "2");
        let query = key("posts", 1);

        registry.record(&query, entities(&[old.clone()]));
        registry.record(&query, entities(&[new.clone()]));

        assert!(registry.dependents_of(&old).is_empty());
        assert!(registry.dependents_of(&new).contains(&query));
        assert_eq!(registry.entity_count(), 1);
    }

    #[test]
    fn multiple_keys_can_share_an_entity() {
        let registry = DependencyRegistry::new();
        let post = EntityKey::new("Post", "5");
        let list = key("posts", 1);
        let top = key("topPosts", 12);

        registry.record(&list, entities(&[post.clone()]));
        registry.record(&top, entities(&[post.clone()]));

        let dependents = registry.dependents_of(&post);
        assert_eq!(dependents.len(), 2);
        assert!(dependents.contains(&list));
        assert!(dependents.contains(&top));
    }

    #[test]
    fn forget_key_cleans_both_maps() {
        let registry = DependencyRegistry::new();
        let post = EntityKey::new("Post", "5");
        let query = key("posts", 1);

        registry.record(&query, entities(&[post.clone()]));
        registry.forget_key(&query);

        assert_eq!(registry.key_count(), 0);
        assert_eq!(registry.entity_count(), 0);
    }

    #[test]
    fn forget_entity_returns_affected_keys() {
        let registry = DependencyRegistry::new();
        let post = EntityKey::new("Post", "5");
        let other = EntityKey::new("Post", "6");
        let query = key("posts", 1);

        registry.record(&query, entities(&[post.clone(), other.clone()]));

        let affected = registry.forget_entity(&post);
        assert!(affected.contains(&query));
        // The key still depends on the surviving entity.
        assert!(registry.dependencies_of(&query).contains(&other));
        assert!(!registry.dependencies_of(&query).contains(&post));
    }
}
