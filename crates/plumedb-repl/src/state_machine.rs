//! The shard-group state machine: applies committed log entries to shard
//! contents, in strict index order, one entry at a time.
//!
//! Application is deterministic: the same entry sequence yields the same
//! shard contents on every participant. Forward application turns storage
//! errors into per-entry failure outcomes (delivered to the submitter at
//! the transaction's Commit entry) so the apply loop never diverges between
//! replicas. Recovery application additionally tolerates the errors that
//! arise from replaying a tail whose explanatory prefix was compacted away.

use crate::error::{ReplicationError, Result};
use crate::log::LogEntry;
use crate::operation::Operation;
use crate::transaction::TransactionTracker;
use plumedb_commons::{
    Document, DocumentKey, GroupId, IndexDefinition, LogIndex, ShardId, ShardProperties,
};
use plumedb_store::{ShardSet, ShardSetView, StorageError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How an entry is being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Normal forward application of a freshly committed entry.
    Forward,
    /// Replay of the uncompacted tail by a new leader.
    Recovery,
}

/// Result of applying one entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Entry applied cleanly.
    Applied,
    /// Payload-less term marker; bookkeeping only.
    TermMarker,
    /// Recovery-mode replay hit a tolerable error; the entry was skipped.
    Tolerated(StorageError),
    /// Forward application hit a fatal error; the mutation did not happen
    /// and the error was recorded against the entry's transaction.
    Failed(StorageError),
    /// A Commit entry closed its transaction, carrying the transaction's
    /// recorded failure if any entry under it failed.
    TrxClosed {
        trx: plumedb_commons::TrxId,
        error: Option<StorageError>,
    },
}

/// Identity and schema of one shard, as carried by compaction anchors and
/// snapshot manifests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardDescriptor {
    pub shard: ShardId,
    pub properties: ShardProperties,
    pub indexes: Vec<IndexDefinition>,
}

/// Materialized state of one shard group plus transaction bookkeeping.
///
/// Owned exclusively by the group's apply task; reads go through
/// point-in-time views.
#[derive(Debug)]
pub struct GroupStateMachine {
    group_id: GroupId,
    shards: ShardSet,
    transactions: TransactionTracker,
    last_applied: LogIndex,
}

impl GroupStateMachine {
    pub fn new(group_id: GroupId) -> Self {
        GroupStateMachine {
            group_id,
            shards: ShardSet::new(),
            transactions: TransactionTracker::new(),
            last_applied: LogIndex::ZERO,
        }
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    /// Force the applied watermark, used when installing a snapshot or
    /// restoring durable state.
    pub fn set_last_applied(&mut self, index: LogIndex) {
        self.last_applied = self.last_applied.max(index);
    }

    pub fn shards(&self) -> &ShardSet {
        &self.shards
    }

    pub(crate) fn shards_mut(&mut self) -> &mut ShardSet {
        &mut self.shards
    }

    pub fn open_transactions(&self) -> usize {
        self.transactions.open_count()
    }

    /// Point-in-time view for reads and snapshot serialization.
    pub fn view(&self) -> ShardSetView {
        self.shards.view()
    }

    /// Schema of every shard in the group.
    pub fn schema_descriptors(&self) -> Vec<ShardDescriptor> {
        self.shards
            .shard_ids()
            .into_iter()
            .filter_map(|id| self.shards.get(&id).map(|s| ShardDescriptor {
                shard: id,
                properties: s.properties().clone(),
                indexes: s.index_definitions(),
            }))
            .collect()
    }

    /// Read against locally applied state.
    pub fn read(&self, shard: &ShardId, key: &DocumentKey) -> Result<Option<Arc<Document>>> {
        Ok(self.shards.shard(shard)?.get(key))
    }

    pub fn shard_doc_count(&self, shard: &ShardId) -> Result<usize> {
        Ok(self.shards.shard(shard)?.len())
    }

    /// Apply one entry. Forward mode never returns `Err` for storage-level
    /// problems (they become `Failed`/`TrxClosed` outcomes so all replicas
    /// take the same path); Recovery mode returns `Err` only for errors
    /// outside the tolerance list, which aborts the recovery attempt.
    pub fn apply(&mut self, entry: &LogEntry, mode: ApplyMode) -> Result<ApplyOutcome> {
        let operation = match &entry.payload {
            Some(op) => op,
            None => {
                self.last_applied = self.last_applied.max(entry.index);
                return Ok(ApplyOutcome::TermMarker);
            }
        };
        let result = self.apply_operation(entry.index, operation);
        self.last_applied = self.last_applied.max(entry.index);
        match result {
            Ok(outcome) => Ok(outcome),
            Err(error) => match mode {
                ApplyMode::Forward => {
                    if let Some(trx) = operation.trx() {
                        self.transactions.record_failure(trx, error.clone());
                    }
                    log::warn!(
                        "StateMachine[{}]: {} at index {} failed: {}",
                        self.group_id,
                        operation.kind(),
                        entry.index,
                        error
                    );
                    Ok(ApplyOutcome::Failed(error))
                }
                ApplyMode::Recovery => {
                    let wrapped: ReplicationError = error.clone().into();
                    if wrapped.is_tolerable_during_recovery() {
                        log::warn!(
                            "StateMachine[{}]: tolerated {} at index {} during recovery: {}",
                            self.group_id,
                            operation.kind(),
                            entry.index,
                            error
                        );
                        Ok(ApplyOutcome::Tolerated(error))
                    } else {
                        Err(wrapped)
                    }
                }
            },
        }
    }

    fn apply_operation(
        &mut self,
        index: LogIndex,
        operation: &Operation,
    ) -> std::result::Result<ApplyOutcome, StorageError> {
        match operation {
            Operation::CreateShard { shard, properties } => {
                self.shards.create_shard(shard.clone(), properties.clone())?;
                log::debug!("StateMachine[{}]: created shard {}", self.group_id, shard);
                Ok(ApplyOutcome::Applied)
            }
            Operation::DropShard { shard } => {
                self.shards.drop_shard(shard)?;
                log::debug!("StateMachine[{}]: dropped shard {}", self.group_id, shard);
                Ok(ApplyOutcome::Applied)
            }
            Operation::ModifyShard { shard, properties } => {
                self.shards.modify_shard(shard, properties.clone())?;
                Ok(ApplyOutcome::Applied)
            }
            Operation::CreateIndex { shard, index: def } => {
                self.shards.shard_mut(shard)?.create_index(def.clone())?;
                Ok(ApplyOutcome::Applied)
            }
            Operation::DropIndex { shard, index_id } => {
                self.shards.shard_mut(shard)?.drop_index(*index_id)?;
                Ok(ApplyOutcome::Applied)
            }
            Operation::Insert { shard, trx, docs } => {
                self.transactions.observe_write(*trx, shard, index);
                let store = self.shards.shard_mut(shard)?;
                for doc in docs {
                    store.insert(doc.clone())?;
                }
                Ok(ApplyOutcome::Applied)
            }
            Operation::Update { shard, trx, docs } => {
                self.transactions.observe_write(*trx, shard, index);
                let store = self.shards.shard_mut(shard)?;
                for doc in docs {
                    store.update(&doc.key, doc.revision, &doc.body)?;
                }
                Ok(ApplyOutcome::Applied)
            }
            Operation::Replace { shard, trx, docs } => {
                self.transactions.observe_write(*trx, shard, index);
                let store = self.shards.shard_mut(shard)?;
                for doc in docs {
                    store.replace(&doc.key, doc.revision, doc.body.clone())?;
                }
                Ok(ApplyOutcome::Applied)
            }
            Operation::Remove { shard, trx, keys } => {
                self.transactions.observe_write(*trx, shard, index);
                let store = self.shards.shard_mut(shard)?;
                for key in keys {
                    store.remove(key)?;
                }
                Ok(ApplyOutcome::Applied)
            }
            Operation::Truncate { shard } => {
                let removed = self.shards.shard_mut(shard)?.truncate();
                log::debug!(
                    "StateMachine[{}]: truncated shard {} ({} documents)",
                    self.group_id,
                    shard,
                    removed
                );
                Ok(ApplyOutcome::Applied)
            }
            Operation::IntermediateCommit { trx } => {
                self.transactions.intermediate_commit(*trx);
                Ok(ApplyOutcome::Applied)
            }
            Operation::Commit { trx } => {
                let error = self.transactions.commit(*trx);
                Ok(ApplyOutcome::TrxClosed { trx: *trx, error })
            }
            Operation::AbortAllOngoingTrx => {
                let aborted = self.transactions.abort_all();
                if !aborted.is_empty() {
                    log::info!(
                        "StateMachine[{}]: voided {} dangling transactions",
                        self.group_id,
                        aborted.len()
                    );
                }
                Ok(ApplyOutcome::Applied)
            }
        }
    }

    /// Install a shard from a snapshot manifest: create it (replacing any
    /// local version) with the leader's properties and index definitions.
    pub fn install_shard(&mut self, descriptor: &ShardDescriptor) -> Result<()> {
        if self.shards.contains(&descriptor.shard) {
            self.shards.drop_shard(&descriptor.shard)?;
        }
        self.shards
            .create_shard(descriptor.shard.clone(), descriptor.properties.clone())?;
        let store = self.shards.shard_mut(&descriptor.shard)?;
        for index in &descriptor.indexes {
            store.create_index(index.clone())?;
        }
        Ok(())
    }

    /// Install a snapshot batch with overwrite semantics, bypassing the
    /// Insert application path.
    pub fn install_documents(&mut self, shard: &ShardId, docs: Vec<Document>) -> Result<()> {
        let store = self.shards.shard_mut(shard)?;
        for doc in docs {
            store.overwrite(doc)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plumedb_commons::{Revision, TrxId};
    use serde_json::json;

    fn machine() -> GroupStateMachine {
        GroupStateMachine::new(GroupId::new(1))
    }

    fn entry(index: u64, op: Operation) -> LogEntry {
        LogEntry::new(LogIndex::new(index), plumedb_commons::Term::new(1), op)
    }

    fn doc(key: &str, rev: u64, value: serde_json::Value) -> Document {
        Document::from_json(DocumentKey::new(key), Revision::new(rev), &value).unwrap()
    }

    fn create_shard(index: u64) -> LogEntry {
        entry(
            index,
            Operation::CreateShard {
                shard: ShardId::new("s1"),
                properties: ShardProperties::default(),
            },
        )
    }

    fn insert(index: u64, trx: u64, docs: Vec<Document>) -> LogEntry {
        entry(
            index,
            Operation::Insert {
                shard: ShardId::new("s1"),
                trx: TrxId::new(trx),
                docs,
            },
        )
    }

    fn commit(index: u64, trx: u64) -> LogEntry {
        entry(index, Operation::Commit { trx: TrxId::new(trx) })
    }

    #[test]
    fn test_forward_apply_sequence() {
        let mut sm = machine();
        sm.apply(&create_shard(1), ApplyMode::Forward).unwrap();
        sm.apply(&insert(2, 1, vec![doc("a", 1, json!({"v": 1}))]), ApplyMode::Forward)
            .unwrap();
        let outcome = sm.apply(&commit(3, 1), ApplyMode::Forward).unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::TrxClosed { trx: TrxId::new(1), error: None }
        );
        assert_eq!(sm.last_applied(), LogIndex::new(3));
        assert_eq!(sm.open_transactions(), 0);

        let got = sm.read(&ShardId::new("s1"), &DocumentKey::new("a")).unwrap().unwrap();
        assert_eq!(got.revision, Revision::new(1));
    }

    #[test]
    fn test_determinism_across_independent_machines() {
        let entries = vec![
            create_shard(1),
            insert(2, 1, vec![doc("a", 1, json!({"v": 1})), doc("b", 2, json!({"v": 2}))]),
            commit(3, 1),
            entry(
                4,
                Operation::Remove {
                    shard: ShardId::new("s1"),
                    trx: TrxId::new(2),
                    keys: vec![DocumentKey::new("a")],
                },
            ),
            commit(5, 2),
        ];
        let mut leader = machine();
        let mut follower = machine();
        for e in &entries {
            leader.apply(e, ApplyMode::Forward).unwrap();
        }
        for e in &entries {
            follower.apply(e, ApplyMode::Forward).unwrap();
        }
        let lv = leader.view();
        let fv = follower.view();
        assert_eq!(lv.total_documents(), fv.total_documents());
        let shard = ShardId::new("s1");
        for d in lv.shard(&shard).unwrap().documents() {
            let other = fv.shard(&shard).unwrap().get(&d.key).unwrap();
            assert_eq!(other.to_json(), d.to_json());
        }
    }

    #[test]
    fn test_forward_failure_recorded_against_transaction() {
        let mut sm = machine();
        sm.apply(&create_shard(1), ApplyMode::Forward).unwrap();
        sm.apply(&insert(2, 1, vec![doc("a", 1, json!({}))]), ApplyMode::Forward).unwrap();
        sm.apply(&commit(3, 1), ApplyMode::Forward).unwrap();

        // Duplicate key under a new transaction fails forward...
        let outcome = sm
            .apply(&insert(4, 2, vec![doc("a", 2, json!({}))]), ApplyMode::Forward)
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::Failed(ref e) if e.is_unique_violation()));

        // ...and the Commit carries the failure to the submitter.
        let outcome = sm.apply(&commit(5, 2), ApplyMode::Forward).unwrap();
        match outcome {
            ApplyOutcome::TrxClosed { error: Some(e), .. } => assert!(e.is_unique_violation()),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_recovery_tolerates_replayed_tail() {
        let mut sm = machine();
        let tail = vec![
            create_shard(1),
            insert(2, 1, vec![doc("a", 1, json!({}))]),
            commit(3, 1),
        ];
        for e in &tail {
            sm.apply(e, ApplyMode::Forward).unwrap();
        }
        // Replaying the same tail (repeated failover) tolerates the
        // already-exists and duplicate-key errors and converges to the
        // same state.
        for e in &tail {
            sm.apply(e, ApplyMode::Recovery).unwrap();
        }
        assert_eq!(sm.shard_doc_count(&ShardId::new("s1")).unwrap(), 1);
        assert_eq!(sm.open_transactions(), 0);
    }

    #[test]
    fn test_recovery_tolerates_shard_not_found() {
        let mut sm = machine();
        // Tail references a shard whose DropShard outlived compaction.
        let orphan = insert(7, 3, vec![doc("x", 1, json!({}))]);
        let outcome = sm.apply(&orphan, ApplyMode::Recovery).unwrap();
        assert!(matches!(outcome, ApplyOutcome::Tolerated(StorageError::ShardNotFound(_))));
        // Forward application of the same entry is a failure, not a skip.
        let outcome = sm.apply(&orphan, ApplyMode::Forward).unwrap();
        assert!(matches!(outcome, ApplyOutcome::Failed(StorageError::ShardNotFound(_))));
    }

    #[test]
    fn test_abort_all_voids_open_transactions_without_undo() {
        let mut sm = machine();
        sm.apply(&create_shard(1), ApplyMode::Forward).unwrap();
        sm.apply(&insert(2, 1, vec![doc("a", 1, json!({}))]), ApplyMode::Forward).unwrap();
        assert_eq!(sm.open_transactions(), 1);

        sm.apply(&entry(3, Operation::AbortAllOngoingTrx), ApplyMode::Forward).unwrap();
        assert_eq!(sm.open_transactions(), 0);
        // The optimistically applied write stays.
        assert!(sm
            .read(&ShardId::new("s1"), &DocumentKey::new("a"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_truncate_clears_shard() {
        let mut sm = machine();
        sm.apply(&create_shard(1), ApplyMode::Forward).unwrap();
        let docs: Vec<Document> = (0..20).map(|i| doc(&format!("k{}", i), i, json!({}))).collect();
        sm.apply(&insert(2, 1, docs), ApplyMode::Forward).unwrap();
        sm.apply(&commit(3, 1), ApplyMode::Forward).unwrap();
        sm.apply(
            &entry(4, Operation::Truncate { shard: ShardId::new("s1") }),
            ApplyMode::Forward,
        )
        .unwrap();
        assert_eq!(sm.shard_doc_count(&ShardId::new("s1")).unwrap(), 0);
    }

    #[test]
    fn test_install_shard_and_documents() {
        let mut sm = machine();
        let descriptor = ShardDescriptor {
            shard: ShardId::new("s1"),
            properties: ShardProperties { wait_for_sync: true, computed_values: vec![] },
            indexes: vec![IndexDefinition {
                id: plumedb_commons::IndexId::new(1),
                name: "by_v".into(),
                fields: vec!["v".into()],
                unique: false,
                sparse: false,
            }],
        };
        sm.install_shard(&descriptor).unwrap();
        sm.install_documents(&ShardId::new("s1"), vec![doc("a", 3, json!({"v": 1}))])
            .unwrap();
        // Re-install replaces wholesale.
        sm.install_shard(&descriptor).unwrap();
        assert_eq!(sm.shard_doc_count(&ShardId::new("s1")).unwrap(), 0);
        assert_eq!(sm.schema_descriptors(), vec![descriptor]);
    }
}
