//! The document model: keys, revisions and JSON-shaped bodies.
//!
//! Bodies are stored as a tree of [`DocValue`] rather than raw
//! `serde_json::Value` so they can travel through bincode-encoded log
//! entries and snapshot batches (bincode cannot decode into a
//! self-describing value type). Conversion to and from `serde_json::Value`
//! happens at the client edge.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Primary key of a document inside one shard. Client supplied via the
/// `_key` attribute or minted by the leader when absent.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub struct DocumentKey(String);

impl DocumentKey {
    pub fn new(key: impl Into<String>) -> Self {
        DocumentKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for DocumentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocumentKey {
    fn from(value: &str) -> Self {
        DocumentKey(value.to_string())
    }
}

impl From<String> for DocumentKey {
    fn from(value: String) -> Self {
        DocumentKey(value)
    }
}

/// Revision of one version of a document. Assigned by the leader at write
/// time and carried inside replicated payloads, so every replica stores the
/// same revision for the same version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode, Default,
)]
pub struct Revision(u64);

impl Revision {
    pub fn new(value: u64) -> Self {
        Revision(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Revision {
    fn from(value: u64) -> Self {
        Revision(value)
    }
}

/// A JSON-shaped value with a closed set of variants.
///
/// `u64` values above `i64::MAX` degrade to `Double` on ingest; everything
/// else round-trips losslessly through `serde_json::Value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum DocValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<DocValue>),
    Object(BTreeMap<String, DocValue>),
}

impl DocValue {
    pub fn from_json(value: &Value) -> DocValue {
        match value {
            Value::Null => DocValue::Null,
            Value::Bool(b) => DocValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DocValue::Int(i)
                } else {
                    DocValue::Double(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => DocValue::String(s.clone()),
            Value::Array(items) => DocValue::Array(items.iter().map(DocValue::from_json).collect()),
            Value::Object(map) => DocValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), DocValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            DocValue::Null => Value::Null,
            DocValue::Bool(b) => Value::Bool(*b),
            DocValue::Int(i) => Value::from(*i),
            DocValue::Double(d) => serde_json::Number::from_f64(*d)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            DocValue::String(s) => Value::String(s.clone()),
            DocValue::Array(items) => Value::Array(items.iter().map(DocValue::to_json).collect()),
            DocValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DocValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Raised when a document body is not a JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("document body must be a JSON object")]
pub struct InvalidDocument;

/// One stored document: primary key, revision and attribute map.
///
/// The reserved attributes `_key` and `_rev` are kept out of `body` and
/// re-injected by [`Document::to_json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Document {
    pub key: DocumentKey,
    pub revision: Revision,
    pub body: BTreeMap<String, DocValue>,
}

impl Document {
    pub fn new(key: DocumentKey, revision: Revision, body: BTreeMap<String, DocValue>) -> Self {
        Document { key, revision, body }
    }

    /// Build a document from a client JSON object. `_key` and `_rev` in the
    /// input are dropped; the caller decides both (key extraction and
    /// revision assignment happen on the leader before replication).
    pub fn from_json(
        key: DocumentKey,
        revision: Revision,
        value: &Value,
    ) -> Result<Document, InvalidDocument> {
        let map = value.as_object().ok_or(InvalidDocument)?;
        let body = map
            .iter()
            .filter(|(k, _)| k.as_str() != "_key" && k.as_str() != "_rev")
            .map(|(k, v)| (k.clone(), DocValue::from_json(v)))
            .collect();
        Ok(Document { key, revision, body })
    }

    /// Render the document as client JSON with `_key` and `_rev` injected.
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("_key".to_string(), Value::String(self.key.to_string()));
        map.insert("_rev".to_string(), Value::String(self.revision.to_string()));
        for (k, v) in &self.body {
            map.insert(k.clone(), v.to_json());
        }
        Value::Object(map)
    }

    /// Look up an attribute by dotted path, e.g. `"address.city"`.
    pub fn get_path(&self, path: &str) -> Option<&DocValue> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.body.get(first)?;
        for part in parts {
            match current {
                DocValue::Object(map) => current = map.get(part)?,
                _ => return None,
            }
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_json(DocumentKey::new("k1"), Revision::new(10), &value).unwrap()
    }

    #[test]
    fn test_from_json_strips_reserved_attributes() {
        let d = doc(json!({"_key": "ignored", "_rev": "9", "name": "plume"}));
        assert_eq!(d.key.as_str(), "k1");
        assert_eq!(d.revision.as_u64(), 10);
        assert!(!d.body.contains_key("_key"));
        assert!(!d.body.contains_key("_rev"));
        assert_eq!(d.body.get("name"), Some(&DocValue::String("plume".into())));
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        let err = Document::from_json(DocumentKey::new("k"), Revision::new(1), &json!([1, 2]));
        assert_eq!(err, Err(InvalidDocument));
    }

    #[test]
    fn test_to_json_injects_key_and_revision() {
        let d = doc(json!({"a": 1}));
        let v = d.to_json();
        assert_eq!(v["_key"], json!("k1"));
        assert_eq!(v["_rev"], json!("10"));
        assert_eq!(v["a"], json!(1));
    }

    #[test]
    fn test_value_round_trip() {
        let v = json!({
            "n": null,
            "b": true,
            "i": -7,
            "d": 2.5,
            "s": "x",
            "arr": [1, "two", {"three": 3}],
            "obj": {"nested": {"deep": false}}
        });
        assert_eq!(DocValue::from_json(&v).to_json(), v);
    }

    #[test]
    fn test_get_path_nested() {
        let d = doc(json!({"address": {"city": "Pune", "geo": {"lat": 18}}}));
        assert_eq!(
            d.get_path("address.city"),
            Some(&DocValue::String("Pune".into()))
        );
        assert_eq!(d.get_path("address.geo.lat"), Some(&DocValue::Int(18)));
        assert_eq!(d.get_path("address.zip"), None);
        assert_eq!(d.get_path("missing"), None);
    }
}
