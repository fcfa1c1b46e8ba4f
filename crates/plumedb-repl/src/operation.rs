//! Replicated operations: the payload of every log entry.
//!
//! Every mutation of a shard group travels through exactly one of these
//! variants. Document writes carry fully resolved documents (keys and
//! revisions assigned by the leader before replication), so applying an
//! operation is deterministic on every participant.

use plumedb_commons::{
    Document, DocumentKey, IndexDefinition, IndexId, ShardId, ShardProperties, TrxId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Create a shard with the given properties.
    CreateShard {
        shard: ShardId,
        properties: ShardProperties,
    },
    /// Drop a shard and everything in it.
    DropShard { shard: ShardId },
    /// Replace a shard's properties wholesale.
    ModifyShard {
        shard: ShardId,
        properties: ShardProperties,
    },
    /// Create a secondary index, building it over existing documents.
    CreateIndex {
        shard: ShardId,
        index: IndexDefinition,
    },
    /// Drop a secondary index.
    DropIndex { shard: ShardId, index_id: IndexId },
    /// Insert documents under a transaction.
    Insert {
        shard: ShardId,
        trx: TrxId,
        docs: Vec<Document>,
    },
    /// Merge patches into existing documents. Each document's body is the
    /// patch; its revision is the post-update revision.
    Update {
        shard: ShardId,
        trx: TrxId,
        docs: Vec<Document>,
    },
    /// Replace existing documents wholesale.
    Replace {
        shard: ShardId,
        trx: TrxId,
        docs: Vec<Document>,
    },
    /// Remove documents by key.
    Remove {
        shard: ShardId,
        trx: TrxId,
        keys: Vec<DocumentKey>,
    },
    /// Clear a shard's key space unconditionally. Always a singleton
    /// transaction, never batched.
    Truncate { shard: ShardId },
    /// Durably persist a transaction's progress so far without making it
    /// visible as complete.
    IntermediateCommit { trx: TrxId },
    /// Close a transaction. The sole visibility boundary for the keys it
    /// touched.
    Commit { trx: TrxId },
    /// Void the bookkeeping of every open transaction. Appended by a new
    /// leader after recovery so no transaction dangles across a term change.
    AbortAllOngoingTrx,
}

impl Operation {
    /// Short name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::CreateShard { .. } => "CreateShard",
            Operation::DropShard { .. } => "DropShard",
            Operation::ModifyShard { .. } => "ModifyShard",
            Operation::CreateIndex { .. } => "CreateIndex",
            Operation::DropIndex { .. } => "DropIndex",
            Operation::Insert { .. } => "Insert",
            Operation::Update { .. } => "Update",
            Operation::Replace { .. } => "Replace",
            Operation::Remove { .. } => "Remove",
            Operation::Truncate { .. } => "Truncate",
            Operation::IntermediateCommit { .. } => "IntermediateCommit",
            Operation::Commit { .. } => "Commit",
            Operation::AbortAllOngoingTrx => "AbortAllOngoingTrx",
        }
    }

    /// Transaction this operation belongs to, if any.
    pub fn trx(&self) -> Option<TrxId> {
        match self {
            Operation::Insert { trx, .. }
            | Operation::Update { trx, .. }
            | Operation::Replace { trx, .. }
            | Operation::Remove { trx, .. }
            | Operation::IntermediateCommit { trx }
            | Operation::Commit { trx } => Some(*trx),
            _ => None,
        }
    }

    /// Shard this operation addresses, if any.
    pub fn shard(&self) -> Option<&ShardId> {
        match self {
            Operation::CreateShard { shard, .. }
            | Operation::DropShard { shard }
            | Operation::ModifyShard { shard, .. }
            | Operation::CreateIndex { shard, .. }
            | Operation::DropIndex { shard, .. }
            | Operation::Insert { shard, .. }
            | Operation::Update { shard, .. }
            | Operation::Replace { shard, .. }
            | Operation::Remove { shard, .. }
            | Operation::Truncate { shard } => Some(shard),
            _ => None,
        }
    }

    /// Whether this operation changes the shard or index schema of the
    /// group (as opposed to document contents or transaction bookkeeping).
    pub fn is_shard_defining(&self) -> bool {
        matches!(
            self,
            Operation::CreateShard { .. }
                | Operation::DropShard { .. }
                | Operation::ModifyShard { .. }
                | Operation::CreateIndex { .. }
                | Operation::DropIndex { .. }
        )
    }

    /// Number of documents (or keys) this operation carries.
    pub fn document_count(&self) -> usize {
        match self {
            Operation::Insert { docs, .. }
            | Operation::Update { docs, .. }
            | Operation::Replace { docs, .. } => docs.len(),
            Operation::Remove { keys, .. } => keys.len(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plumedb_commons::Revision;
    use serde_json::json;

    fn doc(key: &str) -> Document {
        Document::from_json(DocumentKey::new(key), Revision::new(1), &json!({"v": 1})).unwrap()
    }

    #[test]
    fn test_trx_extraction() {
        let insert = Operation::Insert {
            shard: ShardId::new("s1"),
            trx: TrxId::new(9),
            docs: vec![doc("a")],
        };
        assert_eq!(insert.trx(), Some(TrxId::new(9)));
        assert_eq!(insert.document_count(), 1);

        let truncate = Operation::Truncate {
            shard: ShardId::new("s1"),
        };
        assert_eq!(truncate.trx(), None);
        assert_eq!(truncate.shard(), Some(&ShardId::new("s1")));

        assert_eq!(Operation::AbortAllOngoingTrx.trx(), None);
        assert_eq!(Operation::AbortAllOngoingTrx.shard(), None);
    }

    #[test]
    fn test_shard_defining_classification() {
        let create = Operation::CreateShard {
            shard: ShardId::new("s1"),
            properties: ShardProperties::default(),
        };
        assert!(create.is_shard_defining());
        assert!(Operation::DropShard { shard: ShardId::new("s1") }.is_shard_defining());

        let remove = Operation::Remove {
            shard: ShardId::new("s1"),
            trx: TrxId::new(1),
            keys: vec![DocumentKey::new("a")],
        };
        assert!(!remove.is_shard_defining());
        assert!(!Operation::AbortAllOngoingTrx.is_shard_defining());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(
            Operation::Commit { trx: TrxId::new(1) }.kind(),
            "Commit"
        );
        assert_eq!(Operation::AbortAllOngoingTrx.kind(), "AbortAllOngoingTrx");
    }
}
