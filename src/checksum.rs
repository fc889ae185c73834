//! Canonical content checksums.
//!
//! Used to decide whether a JSON upsert is redundant (spec.md §4.1 step 4:
//! "A JSON upsert that re-serializes to a tree structurally equal to the
//! existing content, ignoring key order, is redundant") and to fingerprint
//! commit change-sets for integrity logging.

use std::fmt;

use ring::digest;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A SHA-256 content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum(String);

impl Checksum {
    /// Calculate checksum from raw bytes.
    pub fn compute(content: &[u8]) -> Self {
        let digest = digest::digest(&digest::SHA256, content);
        Self(hex::encode(digest.as_ref()))
    }

    /// Calculate checksum from a serializable value after canonicalizing
    /// JSON object key order, so two structurally-equal trees with
    /// differently-ordered keys hash identically.
    pub fn compute_json<T: Serialize>(value: &T) -> Self {
        let mut json = serde_json::to_value(value).unwrap_or(Value::Null);
        canonicalize_json(&mut json);
        let bytes = serde_json::to_vec(&json).unwrap_or_default();
        Self::compute(&bytes)
    }

    /// Create from an existing hash string with format validation.
    pub fn new(hash: impl Into<String>) -> Result<Self, String> {
        let hash = hash.into();
        if !Self::is_valid(&hash) {
            return Err(format!("invalid SHA-256 hash format: {}", hash));
        }
        Ok(Self(hash))
    }

    /// Check whether `content` matches this checksum.
    pub fn verify(&self, content: &[u8]) -> bool {
        Self::compute(content) == *self
    }

    fn is_valid(hash: &str) -> bool {
        hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Checksum {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

/// Recursively sorts every JSON object's keys so structural equality does
/// not depend on insertion order.
pub fn canonicalize_json(value: &mut Value) {
    match value {
        Value::Array(items) => {
            for item in items.iter_mut() {
                canonicalize_json(item);
            }
        }
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = std::mem::take(map).into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut sorted = serde_json::Map::with_capacity(entries.len());
            for (key, mut value) in entries {
                canonicalize_json(&mut value);
                sorted.insert(key, value);
            }
            *map = sorted;
        }
        _ => {}
    }
}

/// Two JSON values are "structurally equal" per spec.md §4.1/§8 if their
/// canonical (key-order-independent) forms are equal.
pub fn json_structurally_equal(a: &Value, b: &Value) -> bool {
    let mut a = a.clone();
    let mut b = b.clone();
    canonicalize_json(&mut a);
    canonicalize_json(&mut b);
    a == b
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[derive(Serialize)]
    struct MapWrapper {
        map: HashMap<String, String>,
    }

    #[test]
    fn compute_json_is_deterministic_across_key_order() {
        let mut map_a = HashMap::new();
        map_a.insert("b".to_string(), "2".to_string());
        map_a.insert("a".to_string(), "1".to_string());

        let mut map_b = HashMap::new();
        map_b.insert("a".to_string(), "1".to_string());
        map_b.insert("b".to_string(), "2".to_string());

        let hash_a = Checksum::compute_json(&MapWrapper { map: map_a });
        let hash_b = Checksum::compute_json(&MapWrapper { map: map_b });

        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn structurally_equal_ignores_object_key_order() {
        let a: Value = serde_json::from_str(r#"{"foo":0,"bar":1}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"bar":1,"foo":0}"#).unwrap();
        assert!(json_structurally_equal(&a, &b));

        let c: Value = serde_json::from_str(r#"{"bar":2,"foo":0}"#).unwrap();
        assert!(!json_structurally_equal(&a, &c));
    }
}
