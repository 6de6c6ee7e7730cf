//! SHA-256 fingerprints for published schema content and stored record sets

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA256 checksum of canonicalized JSON content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum from JSON value (canonicalized)
    ///
    /// `serde_json::Map` is ordered by key, so the compact rendering is
    /// canonical for equal values.
    pub fn from_json(value: &serde_json::Value) -> Self {
        Self::from_bytes(value.to_string().as_bytes())
    }

    /// Compute one checksum over an ordered sequence of keyed records
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a serde_json::Value)>,
    {
        let mut hasher = Sha256::new();
        for (key, value) in records {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.to_string().as_bytes());
            hasher.update([b'\n']);
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn verify_json(&self, value: &serde_json::Value) -> bool {
        *self == Self::from_json(value)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_checksum_is_key_order_independent() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b": 1, "a": {"y": 2, "x": 3}}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"a": {"x": 3, "y": 2}, "b": 1}"#).unwrap();
        assert_eq!(Checksum::from_json(&a), Checksum::from_json(&b));
    }

    #[test]
    fn test_checksum_different_content() {
        let c1 = Checksum::from_json(&json!({"name": "test1"}));
        let c2 = Checksum::from_json(&json!({"name": "test2"}));
        assert_ne!(c1, c2);
        assert!(c1.verify_json(&json!({"name": "test1"})));
        assert!(!c1.verify_json(&json!({"name": "test2"})));
    }

    #[test]
    fn test_record_checksum_sensitive_to_keys_and_values() {
        let v = json!({"amount": 10});
        let base = Checksum::from_records([("a", &v), ("b", &v)]);
        assert_eq!(base, Checksum::from_records([("a", &v), ("b", &v)]));
        assert_ne!(base, Checksum::from_records([("a", &v)]));
        assert_ne!(base, Checksum::from_records([("a", &v), ("c", &v)]));
    }
}
