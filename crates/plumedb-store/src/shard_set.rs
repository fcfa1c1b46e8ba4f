//! The set of shards materialized by one shard group, plus point-in-time
//! views used for snapshot transfer.
//!
//! A view clones the per-shard key maps but shares the documents (`Arc`),
//! so taking one is proportional to the number of documents, not their
//! size, and later mutations of the live set never show through.

use crate::error::{Result, StorageError};
use crate::shard::ShardStore;
use plumedb_commons::{Document, DocumentKey, IndexDefinition, ShardId, ShardProperties};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ShardSet {
    shards: BTreeMap<ShardId, ShardStore>,
}

impl ShardSet {
    pub fn new() -> Self {
        ShardSet::default()
    }

    pub fn create_shard(&mut self, id: ShardId, properties: ShardProperties) -> Result<()> {
        if self.shards.contains_key(&id) {
            return Err(StorageError::ShardAlreadyExists(id.to_string()));
        }
        self.shards.insert(id.clone(), ShardStore::new(id, properties));
        Ok(())
    }

    pub fn drop_shard(&mut self, id: &ShardId) -> Result<ShardStore> {
        self.shards
            .remove(id)
            .ok_or_else(|| StorageError::ShardNotFound(id.to_string()))
    }

    pub fn modify_shard(&mut self, id: &ShardId, properties: ShardProperties) -> Result<()> {
        self.shard_mut(id)?.set_properties(properties);
        Ok(())
    }

    pub fn shard(&self, id: &ShardId) -> Result<&ShardStore> {
        self.shards
            .get(id)
            .ok_or_else(|| StorageError::ShardNotFound(id.to_string()))
    }

    pub fn shard_mut(&mut self, id: &ShardId) -> Result<&mut ShardStore> {
        self.shards
            .get_mut(id)
            .ok_or_else(|| StorageError::ShardNotFound(id.to_string()))
    }

    pub fn get(&self, id: &ShardId) -> Option<&ShardStore> {
        self.shards.get(id)
    }

    pub fn contains(&self, id: &ShardId) -> bool {
        self.shards.contains_key(id)
    }

    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.shards.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Point-in-time view of every shard.
    pub fn view(&self) -> ShardSetView {
        let shards = self
            .shards
            .iter()
            .map(|(id, store)| {
                (
                    id.clone(),
                    ShardView {
                        shard_id: id.clone(),
                        properties: store.properties().clone(),
                        indexes: store.index_definitions(),
                        documents: store
                            .documents()
                            .map(|d| (d.key.clone(), Arc::clone(d)))
                            .collect(),
                    },
                )
            })
            .collect();
        ShardSetView { shards }
    }
}

/// Immutable view of a whole shard set at one log position.
#[derive(Debug, Clone, Default)]
pub struct ShardSetView {
    shards: BTreeMap<ShardId, ShardView>,
}

impl ShardSetView {
    pub fn shard(&self, id: &ShardId) -> Option<&ShardView> {
        self.shards.get(id)
    }

    pub fn shards(&self) -> impl Iterator<Item = &ShardView> {
        self.shards.values()
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn total_documents(&self) -> usize {
        self.shards.values().map(|s| s.documents.len()).sum()
    }
}

/// Immutable view of one shard.
#[derive(Debug, Clone)]
pub struct ShardView {
    shard_id: ShardId,
    properties: ShardProperties,
    indexes: Vec<IndexDefinition>,
    documents: BTreeMap<DocumentKey, Arc<Document>>,
}

impl ShardView {
    pub fn id(&self) -> &ShardId {
        &self.shard_id
    }

    pub fn properties(&self) -> &ShardProperties {
        &self.properties
    }

    pub fn index_definitions(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    pub fn get(&self, key: &DocumentKey) -> Option<&Arc<Document>> {
        self.documents.get(key)
    }

    pub fn documents(&self) -> impl Iterator<Item = &Arc<Document>> {
        self.documents.values()
    }

    /// Up to `limit` documents with keys strictly after `after`, in key
    /// order. Drives batched snapshot serialization: the caller passes the
    /// last key of the previous batch as the cursor.
    pub fn documents_after(&self, after: Option<&DocumentKey>, limit: usize) -> Vec<Arc<Document>> {
        use std::ops::Bound;
        let lower = match after {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };
        self.documents
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, d)| Arc::clone(d))
            .collect()
    }

    pub fn doc_count(&self) -> usize {
        self.documents.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plumedb_commons::Revision;
    use serde_json::json;

    fn doc(key: &str, v: i64) -> Document {
        Document::from_json(DocumentKey::new(key), Revision::new(1), &json!({ "v": v })).unwrap()
    }

    #[test]
    fn test_create_and_drop_shard() {
        let mut set = ShardSet::new();
        set.create_shard(ShardId::new("s1"), ShardProperties::default()).unwrap();
        assert!(set.contains(&ShardId::new("s1")));
        let err = set
            .create_shard(ShardId::new("s1"), ShardProperties::default())
            .unwrap_err();
        assert_eq!(err, StorageError::ShardAlreadyExists("s1".to_string()));

        set.drop_shard(&ShardId::new("s1")).unwrap();
        assert!(!set.contains(&ShardId::new("s1")));
        let err = set.drop_shard(&ShardId::new("s1")).unwrap_err();
        assert_eq!(err, StorageError::ShardNotFound("s1".to_string()));
    }

    #[test]
    fn test_modify_shard_replaces_properties() {
        let mut set = ShardSet::new();
        set.create_shard(ShardId::new("s1"), ShardProperties::default()).unwrap();
        let props = ShardProperties { wait_for_sync: true, computed_values: vec![] };
        set.modify_shard(&ShardId::new("s1"), props.clone()).unwrap();
        assert_eq!(set.shard(&ShardId::new("s1")).unwrap().properties(), &props);
    }

    #[test]
    fn test_view_is_isolated_from_later_writes() {
        let mut set = ShardSet::new();
        set.create_shard(ShardId::new("s1"), ShardProperties::default()).unwrap();
        set.shard_mut(&ShardId::new("s1")).unwrap().insert(doc("a", 1)).unwrap();

        let view = set.view();
        set.shard_mut(&ShardId::new("s1")).unwrap().insert(doc("b", 2)).unwrap();
        set.shard_mut(&ShardId::new("s1")).unwrap().truncate();

        let shard_view = view.shard(&ShardId::new("s1")).unwrap();
        assert_eq!(shard_view.doc_count(), 1);
        assert!(shard_view.get(&DocumentKey::new("a")).is_some());
        assert!(shard_view.get(&DocumentKey::new("b")).is_none());
        assert_eq!(view.total_documents(), 1);
    }

    #[test]
    fn test_documents_after_pages_in_key_order() {
        let mut set = ShardSet::new();
        set.create_shard(ShardId::new("s1"), ShardProperties::default()).unwrap();
        for key in ["a", "b", "c", "d", "e"] {
            set.shard_mut(&ShardId::new("s1")).unwrap().insert(doc(key, 1)).unwrap();
        }
        let view = set.view();
        let shard_view = view.shard(&ShardId::new("s1")).unwrap();

        let first = shard_view.documents_after(None, 2);
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].key, DocumentKey::new("b"));

        let second = shard_view.documents_after(Some(&first[1].key), 2);
        assert_eq!(second[0].key, DocumentKey::new("c"));

        let rest = shard_view.documents_after(Some(&DocumentKey::new("d")), 10);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].key, DocumentKey::new("e"));
    }
}
