//! Canonical JSON rendering and content hashing

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of raw bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, sort_keys(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Compact JSON with object keys sorted at every depth.
///
/// `serde_json::Map` keeps insertion order only with the `preserve_order`
/// feature; rebuilding in sorted order keeps the output stable either way.
pub fn canonical_bytes<T: Serialize>(document: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(document)?;
    serde_json::to_vec(&sort_keys(value))
}

/// Canonical bytes of already-serialized JSON, whatever its key order
pub fn canonicalize_raw(raw: &[u8]) -> Result<Vec<u8>, serde_json::Error> {
    let value: Value = serde_json::from_slice(raw)?;
    serde_json::to_vec(&sort_keys(value))
}

/// SHA-256 over the canonical rendering of `document`
pub fn content_hash<T: Serialize>(document: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(&canonical_bytes(document)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_canonical_sorts_nested_keys() {
        let doc = json!({"b": 1, "a": {"z": true, "m": [{"y": 1, "x": 2}]}});
        let bytes = canonical_bytes(&doc).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"m":[{"x":2,"y":1}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn test_key_order_does_not_change_hash() {
        let reordered = br#"{ "b": 1,
            "a": {"z": true, "m": [{"x": 2, "y": 1}]} }"#;
        let doc = json!({"a": {"m": [{"y": 1, "x": 2}], "z": true}, "b": 1});

        let from_raw = sha256_hex(&canonicalize_raw(reordered).unwrap());
        assert_eq!(from_raw, content_hash(&doc).unwrap());
    }
}
