//! # Fingerprint module
//!
//! This module provides the CRC-32/IEEE fingerprinting used to detect drift
//! between a request's desired `templateParameters` and the snapshot a
//! reconciliation is currently targeting.

use serde_json::Value;

/// canonicalises a json value by sorting object keys recursively, then
/// returns its compact string rendering.
///
/// array order is preserved: ordering inside an array is part of the value's
/// meaning, unlike map iteration order which is not.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            let mut sorted = serde_json::Map::new();
            for (k, v) in entries {
                sorted.insert(k.to_owned(), canonicalize(v));
            }

            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.to_owned(),
    }
}

/// returns the CRC-32/IEEE fingerprint of the canonical rendering of the
/// given value.
///
/// keys are sorted before hashing so the fingerprint is insensitive to the
/// order template parameters were inserted in, unlike the map-iteration-order
/// dependent hash this replaces.
pub fn fingerprint(value: &Value) -> u32 {
    let canonical = canonicalize(value);
    // preserve_order is enabled crate-wide for serde_json, so to_string()
    // would otherwise reflect insertion order rather than the sorted one.
    let rendered = serde_json::to_string(&canonical).unwrap_or_default();

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(rendered.as_bytes());
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn same_keys_different_order_hash_identically() {
        let a = json!({"node_count": 3, "region": "par", "flavor": "M"});
        let b = json!({"flavor": "M", "node_count": 3, "region": "par"});

        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn nested_maps_are_canonicalised_recursively() {
        let a = json!({"outer": {"b": 1, "a": 2}});
        let b = json!({"outer": {"a": 2, "b": 1}});

        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn array_order_is_significant() {
        let a = json!({"list": [1, 2, 3]});
        let b = json!({"list": [3, 2, 1]});

        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn differing_values_hash_differently() {
        let a = json!({"node_count": 3});
        let b = json!({"node_count": 4});

        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn is_stable_across_calls() {
        let value = json!({"templateName": "single-node-lpg2", "params": {"z": 1, "a": 2}});

        assert_eq!(fingerprint(&value), fingerprint(&value));
    }
}
