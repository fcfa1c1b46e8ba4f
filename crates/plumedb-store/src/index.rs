//! Secondary indexes over shard documents.
//!
//! An index maps an encoded key (the JSON encoding of the extracted field
//! values, which is stable because document objects are ordered maps) to
//! one primary key (unique index) or a set of primary keys (non-unique).
//!
//! Mutations are two-phase: [`ShardIndex::check_insert`] validates a write
//! against all unique constraints before any index is touched, then
//! [`ShardIndex::apply_insert`] records it. The shard store runs the check
//! phase across all of its indexes first, so a rejected write leaves every
//! index untouched.

use crate::error::{Result, StorageError};
use plumedb_commons::{Document, DocumentKey, IndexDefinition};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
enum IndexEntries {
    Unique(BTreeMap<String, DocumentKey>),
    Multi(BTreeMap<String, BTreeSet<DocumentKey>>),
}

/// One secondary index of a shard, kept in lockstep with its documents.
#[derive(Debug, Clone)]
pub struct ShardIndex {
    definition: IndexDefinition,
    entries: IndexEntries,
}

impl ShardIndex {
    pub fn new(definition: IndexDefinition) -> Self {
        let entries = if definition.unique {
            IndexEntries::Unique(BTreeMap::new())
        } else {
            IndexEntries::Multi(BTreeMap::new())
        };
        ShardIndex { definition, entries }
    }

    pub fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    /// Encoded index key for a document, or `None` when the index is sparse
    /// and the document misses one of the indexed fields.
    pub fn index_key(&self, doc: &Document) -> Option<String> {
        let mut values: Vec<Value> = Vec::with_capacity(self.definition.fields.len());
        for field in &self.definition.fields {
            match doc.get_path(field) {
                Some(v) => values.push(v.to_json()),
                None if self.definition.sparse => return None,
                None => values.push(Value::Null),
            }
        }
        // Vec<Value> serialization cannot fail.
        Some(serde_json::to_string(&values).unwrap_or_default())
    }

    /// Populate the index from existing documents. Fails on the first
    /// unique conflict, leaving the index unusable (callers discard it).
    pub fn build<'a>(&mut self, docs: impl Iterator<Item = &'a Document>) -> Result<()> {
        for doc in docs {
            self.check_insert(doc, None)?;
            self.apply_insert(doc);
        }
        Ok(())
    }

    /// Validate that inserting `doc` would not break a unique constraint.
    /// `replacing` is the key of the document this write supersedes (for
    /// update/replace), which is allowed to occupy the slot.
    pub fn check_insert(&self, doc: &Document, replacing: Option<&DocumentKey>) -> Result<()> {
        let key = match self.index_key(doc) {
            Some(k) => k,
            None => return Ok(()),
        };
        if let IndexEntries::Unique(map) = &self.entries {
            if let Some(existing) = map.get(&key) {
                let superseded = replacing == Some(existing) || *existing == doc.key;
                if !superseded {
                    return Err(StorageError::UniqueConstraintViolation(format!(
                        "index {} key {} held by {}",
                        self.definition.name, key, existing
                    )));
                }
            }
        }
        Ok(())
    }

    /// Record `doc` in the index. Must be preceded by a successful
    /// [`check_insert`](Self::check_insert) for unique indexes.
    pub fn apply_insert(&mut self, doc: &Document) {
        let key = match self.index_key(doc) {
            Some(k) => k,
            None => return,
        };
        match &mut self.entries {
            IndexEntries::Unique(map) => {
                map.insert(key, doc.key.clone());
            }
            IndexEntries::Multi(map) => {
                map.entry(key).or_default().insert(doc.key.clone());
            }
        }
    }

    /// Remove `doc` from the index (document removal or the old version on
    /// update/replace).
    pub fn remove(&mut self, doc: &Document) {
        let key = match self.index_key(doc) {
            Some(k) => k,
            None => return,
        };
        match &mut self.entries {
            IndexEntries::Unique(map) => {
                // Only drop the slot if this document still holds it.
                if map.get(&key) == Some(&doc.key) {
                    map.remove(&key);
                }
            }
            IndexEntries::Multi(map) => {
                if let Some(set) = map.get_mut(&key) {
                    set.remove(&doc.key);
                    if set.is_empty() {
                        map.remove(&key);
                    }
                }
            }
        }
    }

    pub fn clear(&mut self) {
        match &mut self.entries {
            IndexEntries::Unique(map) => map.clear(),
            IndexEntries::Multi(map) => map.clear(),
        }
    }

    /// Primary keys of documents whose indexed fields equal `values`.
    pub fn lookup(&self, values: &[Value]) -> Vec<DocumentKey> {
        let key = match serde_json::to_string(&values) {
            Ok(k) => k,
            Err(_) => return Vec::new(),
        };
        match &self.entries {
            IndexEntries::Unique(map) => map.get(&key).cloned().into_iter().collect(),
            IndexEntries::Multi(map) => map
                .get(&key)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }

    pub fn entry_count(&self) -> usize {
        match &self.entries {
            IndexEntries::Unique(map) => map.len(),
            IndexEntries::Multi(map) => map.values().map(|s| s.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plumedb_commons::{IndexId, Revision};
    use serde_json::json;

    fn doc(key: &str, value: Value) -> Document {
        Document::from_json(DocumentKey::new(key), Revision::new(1), &value).unwrap()
    }

    fn unique_index(fields: &[&str]) -> ShardIndex {
        ShardIndex::new(IndexDefinition {
            id: IndexId::new(1),
            name: "test_idx".to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique: true,
            sparse: false,
        })
    }

    #[test]
    fn test_unique_index_rejects_duplicate() {
        let mut idx = unique_index(&["email"]);
        let a = doc("a", json!({"email": "x@y.z"}));
        let b = doc("b", json!({"email": "x@y.z"}));
        idx.check_insert(&a, None).unwrap();
        idx.apply_insert(&a);
        let err = idx.check_insert(&b, None).unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn test_unique_index_allows_self_replace() {
        let mut idx = unique_index(&["email"]);
        let a1 = doc("a", json!({"email": "x@y.z"}));
        idx.apply_insert(&a1);
        // Same key writes the same slot again (replace with same value).
        let a2 = doc("a", json!({"email": "x@y.z"}));
        idx.check_insert(&a2, Some(&DocumentKey::new("a"))).unwrap();
    }

    #[test]
    fn test_sparse_skips_missing_fields() {
        let mut idx = ShardIndex::new(IndexDefinition {
            id: IndexId::new(2),
            name: "sparse_idx".to_string(),
            fields: vec!["opt".to_string()],
            unique: true,
            sparse: true,
        });
        let a = doc("a", json!({"other": 1}));
        let b = doc("b", json!({"other": 2}));
        idx.build([a, b].iter()).unwrap();
        assert_eq!(idx.entry_count(), 0);
    }

    #[test]
    fn test_non_unique_lookup_and_remove() {
        let mut idx = ShardIndex::new(IndexDefinition {
            id: IndexId::new(3),
            name: "by_city".to_string(),
            fields: vec!["city".to_string()],
            unique: false,
            sparse: false,
        });
        let a = doc("a", json!({"city": "Pune"}));
        let b = doc("b", json!({"city": "Pune"}));
        idx.apply_insert(&a);
        idx.apply_insert(&b);
        let mut keys = idx.lookup(&[json!("Pune")]);
        keys.sort();
        assert_eq!(keys, vec![DocumentKey::new("a"), DocumentKey::new("b")]);

        idx.remove(&a);
        assert_eq!(idx.lookup(&[json!("Pune")]), vec![DocumentKey::new("b")]);
        idx.remove(&b);
        assert_eq!(idx.entry_count(), 0);
    }

    #[test]
    fn test_build_detects_existing_duplicates() {
        let mut idx = unique_index(&["email"]);
        let docs = vec![
            doc("a", json!({"email": "same"})),
            doc("b", json!({"email": "same"})),
        ];
        assert!(idx.build(docs.iter()).is_err());
    }

    #[test]
    fn test_compound_key_uses_all_fields() {
        let mut idx = unique_index(&["a", "b"]);
        let d1 = doc("k1", json!({"a": 1, "b": 1}));
        let d2 = doc("k2", json!({"a": 1, "b": 2}));
        idx.apply_insert(&d1);
        // Different second field, no conflict.
        idx.check_insert(&d2, None).unwrap();
    }
}
