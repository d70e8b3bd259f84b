//! # Utilities
//!
//! Hashing helpers shared by the trigger detectors and the promotion logic.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::constants::CONFIG_HASH_LENGTH;

/// Strip `null` members from objects, recursively.
///
/// Objects nested in arrays are cleaned as well; `null` array elements are
/// kept since their position is meaningful. `None` yields an empty object.
#[must_use]
pub fn remove_none_values(value: Option<&Value>) -> Value {
    match value {
        None => Value::Object(Map::new()),
        Some(value) => strip_nulls(value),
    }
}

fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_nulls).collect()),
        other => other.clone(),
    }
}

/// Serialize with object keys sorted at every level
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                Value::Object(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k.clone(), sorted(v)))
                        .collect(),
                )
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

/// Deterministic digest of a target config: SHA-256 over the canonical JSON
/// form, first [`CONFIG_HASH_LENGTH`] hex characters
#[must_use]
pub fn config_hash(config: &Value) -> String {
    let digest = Sha256::digest(canonical_json(config).as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(CONFIG_HASH_LENGTH);
    hex
}
