//! Transaction bookkeeping over replicated document writes.
//!
//! A transaction is opened implicitly by the first operation referencing a
//! new trx id and closed by exactly one Commit, or voided wholesale by
//! AbortAllOngoingTrx after a leadership change. Document mutations are
//! applied optimistically as their entries are processed; the tracker only
//! correlates them into atomic units and carries per-transaction failure
//! state so the Commit entry can report the outcome.

use plumedb_commons::{LogIndex, ShardId, TrxId};
use plumedb_store::StorageError;
use std::collections::{BTreeMap, BTreeSet};

/// One open transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: TrxId,
    pub opened_at: LogIndex,
    pub shards_touched: BTreeSet<ShardId>,
    pub intermediate_commits: u64,
    /// First fatal error hit by one of this transaction's entries during
    /// forward application. Reported to the submitter at Commit.
    pub failure: Option<StorageError>,
}

/// Tracks all open transactions of one shard group.
#[derive(Debug, Default)]
pub struct TransactionTracker {
    open: BTreeMap<TrxId, Transaction>,
}

impl TransactionTracker {
    pub fn new() -> Self {
        TransactionTracker::default()
    }

    /// Record a document write under `trx`, opening the transaction if this
    /// is its first entry.
    pub fn observe_write(&mut self, trx: TrxId, shard: &ShardId, index: LogIndex) {
        let transaction = self.open.entry(trx).or_insert_with(|| Transaction {
            id: trx,
            opened_at: index,
            shards_touched: BTreeSet::new(),
            intermediate_commits: 0,
            failure: None,
        });
        transaction.shards_touched.insert(shard.clone());
    }

    /// Record a fatal forward-application error for one of the
    /// transaction's entries. Only the first failure is kept.
    pub fn record_failure(&mut self, trx: TrxId, error: StorageError) {
        if let Some(transaction) = self.open.get_mut(&trx) {
            if transaction.failure.is_none() {
                transaction.failure = Some(error);
            }
        }
    }

    /// An IntermediateCommit marker was applied for `trx`.
    pub fn intermediate_commit(&mut self, trx: TrxId) {
        if let Some(transaction) = self.open.get_mut(&trx) {
            transaction.intermediate_commits += 1;
        }
    }

    /// Close `trx`, returning its recorded failure if any. Unknown ids are
    /// closed silently: the opening entries may have been compacted away
    /// before a replayed tail reaches the Commit.
    pub fn commit(&mut self, trx: TrxId) -> Option<StorageError> {
        self.open.remove(&trx).and_then(|t| t.failure)
    }

    /// Void every open transaction, returning the ids that were dangling.
    pub fn abort_all(&mut self) -> Vec<TrxId> {
        let ids: Vec<TrxId> = self.open.keys().copied().collect();
        self.open.clear();
        ids
    }

    pub fn get(&self, trx: TrxId) -> Option<&Transaction> {
        self.open.get(&trx)
    }

    pub fn is_open(&self, trx: TrxId) -> bool {
        self.open.contains_key(&trx)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}
