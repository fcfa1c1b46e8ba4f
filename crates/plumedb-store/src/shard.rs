//! A single shard: documents keyed by `_key` plus secondary indexes.
//!
//! All mutations arrive from the log apply path, one at a time per log, so
//! methods take `&mut self` and there is no interior locking here. Writes
//! either fully apply or leave the shard untouched (index checks run before
//! any mutation).

use crate::error::{Result, StorageError};
use crate::index::ShardIndex;
use plumedb_commons::{
    DocValue, Document, DocumentKey, IndexDefinition, IndexId, Revision, ShardId, ShardProperties,
};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ShardStore {
    shard_id: ShardId,
    properties: ShardProperties,
    documents: BTreeMap<DocumentKey, Arc<Document>>,
    indexes: BTreeMap<IndexId, ShardIndex>,
}

impl ShardStore {
    pub fn new(shard_id: ShardId, properties: ShardProperties) -> Self {
        ShardStore {
            shard_id,
            properties,
            documents: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &ShardId {
        &self.shard_id
    }

    pub fn properties(&self) -> &ShardProperties {
        &self.properties
    }

    pub fn set_properties(&mut self, properties: ShardProperties) {
        self.properties = properties;
    }

    pub fn get(&self, key: &DocumentKey) -> Option<Arc<Document>> {
        self.documents.get(key).cloned()
    }

    pub fn contains_key(&self, key: &DocumentKey) -> bool {
        self.documents.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn document_keys(&self) -> Vec<DocumentKey> {
        self.documents.keys().cloned().collect()
    }

    pub fn documents(&self) -> impl Iterator<Item = &Arc<Document>> {
        self.documents.values()
    }

    /// Insert a new document. The primary key must be free and every unique
    /// index must accept it.
    pub fn insert(&mut self, doc: Document) -> Result<()> {
        if self.documents.contains_key(&doc.key) {
            return Err(StorageError::UniqueConstraintViolation(format!(
                "_key {} already present in shard {}",
                doc.key, self.shard_id
            )));
        }
        for index in self.indexes.values() {
            index.check_insert(&doc, None)?;
        }
        for index in self.indexes.values_mut() {
            index.apply_insert(&doc);
        }
        self.documents.insert(doc.key.clone(), Arc::new(doc));
        Ok(())
    }

    /// Merge a patch into an existing document, producing `new_revision`.
    /// Objects merge recursively; any other value (including null) replaces.
    pub fn update(
        &mut self,
        key: &DocumentKey,
        new_revision: Revision,
        patch: &BTreeMap<String, DocValue>,
    ) -> Result<Arc<Document>> {
        let old = self
            .documents
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::DocumentNotFound(key.to_string()))?;
        let mut body = old.body.clone();
        merge_body(&mut body, patch);
        let new_doc = Document::new(key.clone(), new_revision, body);
        self.swap_document(&old, new_doc)
    }

    /// Replace an existing document wholesale, producing `new_revision`.
    pub fn replace(
        &mut self,
        key: &DocumentKey,
        new_revision: Revision,
        body: BTreeMap<String, DocValue>,
    ) -> Result<Arc<Document>> {
        let old = self
            .documents
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::DocumentNotFound(key.to_string()))?;
        let new_doc = Document::new(key.clone(), new_revision, body);
        self.swap_document(&old, new_doc)
    }

    /// Remove a document by key, returning the removed version.
    pub fn remove(&mut self, key: &DocumentKey) -> Result<Arc<Document>> {
        let old = self
            .documents
            .remove(key)
            .ok_or_else(|| StorageError::DocumentNotFound(key.to_string()))?;
        for index in self.indexes.values_mut() {
            index.remove(&old);
        }
        Ok(old)
    }

    /// Drop every document, keeping indexes defined but empty. Returns the
    /// number of documents removed.
    pub fn truncate(&mut self) -> u64 {
        let removed = self.documents.len() as u64;
        self.documents.clear();
        for index in self.indexes.values_mut() {
            index.clear();
        }
        removed
    }

    /// Insert-or-replace used while installing a snapshot batch. Unique
    /// checks still run; a consistent snapshot never trips them.
    pub fn overwrite(&mut self, doc: Document) -> Result<()> {
        if let Some(old) = self.documents.get(&doc.key).cloned() {
            self.swap_document(&old, doc)?;
        } else {
            self.insert(doc)?;
        }
        Ok(())
    }

    /// Create a secondary index and build it over the existing documents.
    /// A unique conflict among existing documents fails the build and the
    /// index is not created.
    pub fn create_index(&mut self, definition: IndexDefinition) -> Result<()> {
        if self.indexes.contains_key(&definition.id) {
            return Err(StorageError::IndexAlreadyExists(definition.id.to_string()));
        }
        if self.indexes.values().any(|i| i.definition().name == definition.name) {
            return Err(StorageError::IndexAlreadyExists(definition.name.clone()));
        }
        let mut index = ShardIndex::new(definition);
        index.build(self.documents.values().map(|d| d.as_ref()))?;
        log::debug!(
            "Shard[{}]: created index {} over {} documents",
            self.shard_id,
            index.definition().name,
            self.documents.len()
        );
        self.indexes.insert(index.definition().id, index);
        Ok(())
    }

    pub fn drop_index(&mut self, id: IndexId) -> Result<IndexDefinition> {
        self.indexes
            .remove(&id)
            .map(|i| {
                log::debug!("Shard[{}]: dropped index {}", self.shard_id, i.definition().name);
                i.definition().clone()
            })
            .ok_or_else(|| StorageError::IndexNotFound(id.to_string()))
    }

    pub fn index(&self, id: IndexId) -> Option<&ShardIndex> {
        self.indexes.get(&id)
    }

    pub fn index_definitions(&self) -> Vec<IndexDefinition> {
        self.indexes.values().map(|i| i.definition().clone()).collect()
    }

    /// Replace `old` with `new_doc` under the same key, updating indexes.
    /// Unique checks run across all indexes before anything mutates.
    fn swap_document(&mut self, old: &Arc<Document>, new_doc: Document) -> Result<Arc<Document>> {
        for index in self.indexes.values() {
            index.check_insert(&new_doc, Some(&old.key))?;
        }
        for index in self.indexes.values_mut() {
            index.remove(old);
            index.apply_insert(&new_doc);
        }
        let stored = Arc::new(new_doc);
        self.documents.insert(stored.key.clone(), Arc::clone(&stored));
        Ok(stored)
    }
}

/// Recursive object merge: objects merge key by key, everything else
/// (null included) overwrites.
fn merge_body(into: &mut BTreeMap<String, DocValue>, patch: &BTreeMap<String, DocValue>) {
    for (k, v) in patch {
        match (into.get_mut(k), v) {
            (Some(DocValue::Object(existing)), DocValue::Object(incoming)) => {
                merge_body(existing, incoming);
            }
            _ => {
                into.insert(k.clone(), v.clone());
            }
        }
    }
}
