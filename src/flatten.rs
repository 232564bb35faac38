//! Flattening nested JSON into column/value pairs.
//!
//! Object keys and array indices become path segments joined by a
//! separator, so `{"a":{"b":1},"c":[2,3]}` becomes
//! `{"a.b":1, "c.0":2, "c.1":3}`. Leaves are scalars, including `null`.
//! Empty objects and arrays contribute no columns.
//!
//! Two different inputs can flatten to the same key, e.g. `{"a.b":1}` and
//! `{"a":{"b":2}}` inside one record. [`CollisionPolicy`] decides whether
//! that is an error or the later value wins; the default keeps the later
//! value and logs a warning.

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{CbcError, Result};

/// What to do when two paths flatten to the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Keep the value seen last, logging a warning.
    #[default]
    LastWriteWins,
    /// Fail with `CbcError::FlattenCollision`.
    Reject,
}

/// Configurable flattener.
#[derive(Debug, Clone)]
pub struct Flattener {
    separator: String,
    policy: CollisionPolicy,
}

impl Default for Flattener {
    fn default() -> Self {
        Flattener {
            separator: ".".to_string(),
            policy: CollisionPolicy::default(),
        }
    }
}

impl Flattener {
    pub fn new(separator: &str, policy: CollisionPolicy) -> Self {
        Flattener {
            separator: separator.to_string(),
            policy,
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Flattens `value`. A scalar at the top level maps from the empty key.
    pub fn flatten(&self, value: &Value) -> Result<Map<String, Value>> {
        let mut out = Map::new();
        self.walk(value, String::new(), &mut out)?;
        Ok(out)
    }

    fn join(&self, prefix: &str, segment: &str) -> String {
        if prefix.is_empty() {
            segment.to_string()
        } else {
            format!("{prefix}{}{segment}", self.separator)
        }
    }

    fn walk(&self, value: &Value, prefix: String, out: &mut Map<String, Value>) -> Result<()> {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    self.walk(child, self.join(&prefix, key), out)?;
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    self.walk(child, self.join(&prefix, &i.to_string()), out)?;
                }
            }
            scalar => self.insert(prefix, scalar.clone(), out)?,
        }
        Ok(())
    }

    fn insert(&self, key: String, value: Value, out: &mut Map<String, Value>) -> Result<()> {
        if out.contains_key(&key) {
            match self.policy {
                CollisionPolicy::Reject => return Err(CbcError::FlattenCollision { key }),
                CollisionPolicy::LastWriteWins => {
                    warn!(key = %key, "flattened key collision, keeping later value");
                }
            }
        }
        out.insert(key, value);
        Ok(())
    }
}

/// Flattens with the default `.` separator and last-write-wins collisions.
pub fn flatten(value: &Value) -> Result<Map<String, Value>> {
    Flattener::default().flatten(value)
}

/// Renders a flattened scalar as spreadsheet text: strings verbatim,
/// `null` as empty, everything else via its JSON form.
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_objects_and_arrays_become_dotted_paths() {
        let flat = flatten(&json!({"a": {"b": 1}, "c": [2, 3]})).unwrap();
        assert_eq!(Value::Object(flat), json!({"a.b": 1, "c.0": 2, "c.1": 3}));
    }

    #[test]
    fn key_order_follows_document_order() {
        let flat = flatten(&json!({"z": 1, "a": {"y": 2, "b": 3}})).unwrap();
        let keys: Vec<&str> = flat.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a.y", "a.b"]);
    }

    #[test]
    fn nulls_are_leaves_and_empty_containers_vanish() {
        let flat = flatten(&json!({"n": null, "o": {}, "l": []})).unwrap();
        assert_eq!(Value::Object(flat), json!({"n": null}));
    }

    #[test]
    fn custom_separator_matches_underscore_style() {
        let f = Flattener::new("_", CollisionPolicy::Reject);
        let flat = f
            .flatten(&json!({"results": [{"report_ids": ["r1", "r2"]}]}))
            .unwrap();
        assert_eq!(flat["results_0_report_ids_1"], "r2");
    }

    #[test]
    fn top_level_scalar_uses_empty_key() {
        let flat = flatten(&json!(42)).unwrap();
        assert_eq!(flat[""], 42);
    }

    #[test]
    fn collision_last_write_wins_by_default() {
        let flat = flatten(&json!({"a.b": 1, "a": {"b": 2}})).unwrap();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat["a.b"], 2);
    }

    #[test]
    fn collision_rejected_when_configured() {
        let f = Flattener::new(".", CollisionPolicy::Reject);
        let err = f.flatten(&json!({"a.b": 1, "a": {"b": 2}})).unwrap_err();
        assert!(matches!(err, CbcError::FlattenCollision { ref key } if key == "a.b"));
    }

    #[test]
    fn scalar_text_rendering() {
        assert_eq!(scalar_text(&json!(null)), "");
        assert_eq!(scalar_text(&json!("plain")), "plain");
        assert_eq!(scalar_text(&json!(3.5)), "3.5");
        assert_eq!(scalar_text(&json!(true)), "true");
    }
}
