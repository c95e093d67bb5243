//! Canonical JSON and request fingerprinting
//!
//! The canonical form sorts object keys recursively and serializes with no
//! whitespace, so semantically-equal bodies hash identically regardless of
//! key order.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Rebuild a value with all object keys sorted recursively
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (key, val) in entries {
                sorted.insert(key.clone(), canonicalize(val));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Canonical compact serialization
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// Hex SHA-256 of the canonical serialization
pub fn fingerprint(value: &Value) -> String {
    let canonical = canonical_json(value);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_fingerprint() {
        let a = json!({"amount": 100, "currency": "BRL", "customer": {"id": "c1", "name": "x"}});
        let b = json!({"customer": {"name": "x", "id": "c1"}, "currency": "BRL", "amount": 100});
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn value_changes_change_fingerprint() {
        let a = json!({"amount": 100});
        let b = json!({"amount": 101});
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn arrays_preserve_order() {
        let a = json!({"items": [1, 2]});
        let b = json!({"items": [2, 1]});
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn canonical_json_is_compact_and_sorted() {
        let value = json!({"b": 1, "a": {"d": 2, "c": 3}});
        assert_eq!(canonical_json(&value), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }
}
