//! Normalized entity storage.
//!
//! The `EntityStore` is the single ground truth for entity data: every cached
//! query result references records here rather than carrying its own copies,
//! so overlapping queries can never hold divergent versions of one entity.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::{Map, Value};
use tracing::debug;

use super::keys::EntityKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

/// Key-value store of normalized entity records.
///
/// Records are flat JSON objects whose fields may contain references to other
/// entities (see `normalize`). Mutation goes through `upsert`/`remove` only.
pub struct EntityStore {
    records: RwLock<HashMap<EntityKey, Map<String, Value>>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Merge fields into an existing record, creating it if absent.
    ///
    /// Shallow merge, last write wins per field; arrays are replaced
    /// wholesale. A field absent from `fields` is left untouched, while an
    /// explicit JSON `null` overwrites. Returns true if any field changed.
    pub fn upsert(&self, key: &EntityKey, fields: &Map<String, Value>) -> bool {
        let mut records = rw_write(&self.records, SOURCE, "upsert");
        let record = records.entry(key.clone()).or_default();

        let mut changed = false;
        for (name, value) in fields {
            match record.get(name) {
                Some(existing) if existing == value => {}
                _ => {
                    record.insert(name.clone(), value.clone());
                    changed = true;
                }
            }
        }

        if changed {
            debug!(entity = %key, fields = fields.len(), "Entity record upserted");
        }
        changed
    }

    /// Current record for an entity, or `None` when not cached.
    pub fn get(&self, key: &EntityKey) -> Option<Map<String, Value>> {
        rw_read(&self.records, SOURCE, "get").get(key).cloned()
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        rw_read(&self.records, SOURCE, "contains").contains_key(key)
    }

    /// Delete a record. Returns true if it existed.
    ///
    /// Cascading cleanup of query views that referenced the record is the
    /// mutation coordinator's job; the store only forgets the ground truth.
    pub fn remove(&self, key: &EntityKey) -> bool {
        let removed = rw_write(&self.records, SOURCE, "remove")
            .remove(key)
            .is_some();
        if removed {
            debug!(entity = %key, "Entity record removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        rw_read(&self.records, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        rw_write(&self.records, SOURCE, "clear").clear();
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}
