//! Cache key definitions.
//!
//! `QueryKey` canonically encodes one operation + variables combination;
//! `EntityKey` identifies a normalized entity record for invalidation.

use std::fmt;

use serde_json::Value;

/// Canonical identifier for one `(operation, variables)` combination.
///
/// Two logically identical variable sets encode to the same key regardless of
/// property insertion order: object keys are sorted recursively, `null`
/// members are dropped (an unset optional variable), and scalars are written
/// in their canonical JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    text: String,
    op_len: usize,
}

impl QueryKey {
    /// Encode an operation name and its variables into a stable key.
    pub fn encode(operation: &str, variables: &Value) -> Self {
        let mut text = String::with_capacity(operation.len() + 32);
        text.push_str(operation);
        text.push('|');
        write_canonical(variables, &mut text);
        Self {
            text,
            op_len: operation.len(),
        }
    }

    /// The operation name this key was encoded from.
    pub fn operation(&self) -> &str {
        &self.text[..self.op_len]
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Identifies a normalized entity record: `(typeName, id)`.
///
/// Composite identities (e.g. a content variant keyed by post and language)
/// join their id parts with `:` in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub type_name: String,
    pub id: String,
}

impl EntityKey {
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name, self.id)
    }
}

/// Write the canonical JSON text of `value` into `out`.
///
/// Object members are emitted in sorted key order; members whose value is
/// `null` are omitted so `{a:1}` and `{a:1,b:null}` collide.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_escaped(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, _)| k)
                .collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(key, out);
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}

fn write_escaped(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
