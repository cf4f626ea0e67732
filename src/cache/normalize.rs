//! Response decomposition and reassembly.
//!
//! Fetch responses are walked recursively: every sub-object recognized by an
//! entity marker becomes a staged store write and is replaced by a reference,
//! leaving a "shape" tree of plain values and refs. Decomposition is pure —
//! the coordinator applies the staged writes only after the whole response
//! normalized cleanly, so a decode failure leaves the cache untouched.
//! Reading a slot resolves the refs back against the store, which is how
//! every view of an entity observes the same record.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::error::QueryError;

use super::keys::EntityKey;
use super::store::EntityStore;

/// Field name marking an entity reference inside a stored shape.
const REF_KEY: &str = "__ref";

/// Declares how to recognize one entity type inside a response.
///
/// An object is classified as this type when all of its id fields are present.
/// Markers are checked in declaration order and the first match wins, so more
/// specific markers (composite ids) must be declared before broader ones.
#[derive(Debug, Clone)]
pub struct EntityMarker {
    pub type_name: String,
    pub id_fields: Vec<String>,
}

impl EntityMarker {
    pub fn new<S, I, F>(type_name: S, id_fields: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        Self {
            type_name: type_name.into(),
            id_fields: id_fields.into_iter().map(Into::into).collect(),
        }
    }

    fn matches(&self, object: &Map<String, Value>) -> bool {
        self.id_fields
            .iter()
            .all(|field| object.get(field).is_some_and(|v| !v.is_null()))
    }

    /// Join the id field values into the entity id, `:`-separated.
    fn identity_of(&self, object: &Map<String, Value>) -> Result<String, QueryError> {
        let mut id = String::new();
        for (i, field) in self.id_fields.iter().enumerate() {
            if i > 0 {
                id.push(':');
            }
            match &object[field.as_str()] {
                Value::String(s) => id.push_str(s),
                Value::Number(n) => id.push_str(&n.to_string()),
                Value::Bool(b) => id.push_str(if *b { "true" } else { "false" }),
                other => {
                    return Err(QueryError::decode(format!(
                        "id field `{field}` of `{}` is not a scalar: {other}",
                        self.type_name
                    )));
                }
            }
        }
        Ok(id)
    }
}

/// The marker set for one API; checked in declaration order.
#[derive(Debug, Clone, Default)]
pub struct EntitySchema {
    markers: Vec<EntityMarker>,
}

impl EntitySchema {
    pub fn new(markers: Vec<EntityMarker>) -> Self {
        Self { markers }
    }

    fn classify(&self, object: &Map<String, Value>) -> Option<&EntityMarker> {
        self.markers.iter().find(|marker| marker.matches(object))
    }
}

/// Outcome of decomposing one response.
#[derive(Debug)]
pub(crate) struct Normalized {
    /// The response tree with entity objects replaced by refs.
    pub shape: Value,
    /// Staged entity writes, children before parents.
    pub writes: Vec<(EntityKey, Map<String, Value>)>,
}

impl Normalized {
    /// Every entity the response mentioned.
    pub fn touched(&self) -> HashSet<EntityKey> {
        self.writes.iter().map(|(key, _)| key.clone()).collect()
    }
}

/// Decompose a response into staged store writes plus a ref-tree shape.
pub(crate) fn normalize(schema: &EntitySchema, value: &Value) -> Result<Normalized, QueryError> {
    let mut writes = Vec::new();
    let shape = normalize_value(schema, value, &mut writes)?;
    Ok(Normalized { shape, writes })
}

fn normalize_value(
    schema: &EntitySchema,
    value: &Value,
    writes: &mut Vec<(EntityKey, Map<String, Value>)>,
) -> Result<Value, QueryError> {
    match value {
        Value::Object(object) => {
            let mut fields = Map::with_capacity(object.len());
            for (name, field) in object {
                fields.insert(name.clone(), normalize_value(schema, field, writes)?);
            }

            if let Some(marker) = schema.classify(object) {
                let key = EntityKey::new(marker.type_name.clone(), marker.identity_of(object)?);
                let mut reference = Map::with_capacity(1);
                reference.insert(REF_KEY.to_string(), Value::String(key.to_string()));
                writes.push((key, fields));
                Ok(Value::Object(reference))
            } else {
                Ok(Value::Object(fields))
            }
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(normalize_value(schema, item, writes)?);
            }
            Ok(Value::Array(out))
        }
        scalar => Ok(scalar.clone()),
    }
}

/// Parse a ref object back into an entity key.
fn as_entity_ref(object: &Map<String, Value>) -> Option<EntityKey> {
    if object.len() != 1 {
        return None;
    }
    let target = object.get(REF_KEY)?.as_str()?;
    let (type_name, id) = target.split_once(':')?;
    Some(EntityKey::new(type_name, id))
}

/// Resolve a shape back into a plain value against the store.
///
/// A dangling ref (entity removed since the shape was stored) yields `None`;
/// inside arrays dangling elements are filtered out, as direct object fields
/// they resolve to `null`.
pub(crate) fn denormalize(store: &EntityStore, shape: &Value) -> Option<Value> {
    match shape {
        Value::Object(object) => {
            if let Some(key) = as_entity_ref(object) {
                let record = store.get(&key)?;
                let mut out = Map::with_capacity(record.len());
                for (name, field) in &record {
                    out.insert(
                        name.clone(),
                        denormalize(store, field).unwrap_or(Value::Null),
                    );
                }
                Some(Value::Object(out))
            } else {
                let mut out = Map::with_capacity(object.len());
                for (name, field) in object {
                    out.insert(
                        name.clone(),
                        denormalize(store, field).unwrap_or(Value::Null),
                    );
                }
                Some(Value::Object(out))
            }
        }
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter_map(|item| denormalize(store, item))
                .collect(),
        )),
        scalar => Some(scalar.clone()),
    }
}

/// Drop refs to removed entities from a stored shape.
///
/// Returns the number of refs dropped that have not yet been absorbed by a
/// `totalCount` fixup: an object carrying `totalCount` decrements it by the
/// drops observed under its own fields (and recomputes `totalPages` when
/// `pageSize` is available), then stops propagating the count upward. The
/// decrement is optimistic; the next real fetch overwrites it wholesale.
pub(crate) fn prune_removed(shape: &mut Value, removed: &HashSet<EntityKey>) -> usize {
    match shape {
        Value::Array(items) => {
            let before = items.len();
            items.retain(|item| {
                item.as_object()
                    .and_then(as_entity_ref)
                    .is_none_or(|key| !removed.contains(&key))
            });
            let mut dropped = before - items.len();
            for item in items.iter_mut() {
                dropped += prune_removed(item, removed);
            }
            dropped
        }
        Value::Object(object) => {
            let mut dropped = 0;
            for (_name, field) in object.iter_mut() {
                dropped += prune_removed(field, removed);
            }
            if dropped > 0 && object.contains_key("totalCount") {
                apply_count_fixup(object, dropped);
                0
            } else {
                dropped
            }
        }
        _ => 0,
    }
}

fn apply_count_fixup(object: &mut Map<String, Value>, dropped: usize) {
    let Some(total) = object.get("totalCount").and_then(Value::as_i64) else {
        return;
    };
    let new_total = (total - dropped as i64).max(0);
    object.insert("totalCount".to_string(), Value::from(new_total));

    if let Some(page_size) = object.get("pageSize").and_then(Value::as_i64) {
        if page_size > 0 && object.contains_key("totalPages") {
            let pages = ((new_total + page_size - 1) / page_size).max(1);
            object.insert("totalPages".to_string(), Value::from(pages));
        }
    }
}
