//! In-memory log store for one shard group.
//!
//! Entries live in a BTreeMap keyed by index so range reads and prefix
//! compaction are cheap. Appends on the leader assign the next index; a
//! follower inserts entries under the index the leader assigned. A Notify
//! wakes the apply loop when the entry it waits for arrives.

use crate::compaction::CompactionAnchor;
use crate::error::{ReplicationError, Result};
use crate::log::entry::LogEntry;
use crate::operation::Operation;
use crate::state_machine::ShardDescriptor;
use plumedb_commons::{GroupId, LogIndex, Term};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct LogInner {
    entries: BTreeMap<u64, LogEntry>,
    last_index: LogIndex,
    anchor: CompactionAnchor,
}

/// Append-only, index-addressed entry sequence for one shard group.
#[derive(Debug)]
pub struct LogStore {
    group_id: GroupId,
    inner: RwLock<LogInner>,
    appended: Notify,
}

impl LogStore {
    pub fn new(group_id: GroupId) -> Self {
        LogStore {
            group_id,
            inner: RwLock::new(LogInner::default()),
            appended: Notify::new(),
        }
    }

    /// Rebuild a log store from durable state: the compaction anchor plus
    /// the uncompacted entries.
    pub fn restore(group_id: GroupId, anchor: CompactionAnchor, entries: Vec<LogEntry>) -> Self {
        let last_index = entries
            .last()
            .map(|e| e.index)
            .unwrap_or(anchor.index);
        let store = LogStore {
            group_id,
            inner: RwLock::new(LogInner {
                entries: entries.into_iter().map(|e| (e.index.as_u64(), e)).collect(),
                last_index,
                anchor,
            }),
            appended: Notify::new(),
        };
        store
    }

    /// Leader-side append: assigns the next index. `None` payload appends a
    /// term marker.
    pub fn append(&self, term: Term, payload: Option<Operation>) -> LogIndex {
        let mut inner = self.inner.write();
        let index = inner.last_index.next();
        let entry = match payload {
            Some(op) => LogEntry::new(index, term, op),
            None => LogEntry::term_marker(index, term),
        };
        inner.entries.insert(index.as_u64(), entry);
        inner.last_index = index;
        drop(inner);
        self.appended.notify_waiters();
        index
    }

    /// Follower-side append of an entry under the index the leader assigned.
    /// Duplicates are ignored; gaps are rejected. An empty log accepts any
    /// starting index (resuming after a snapshot).
    pub fn append_entry(&self, entry: LogEntry) -> Result<()> {
        let mut inner = self.inner.write();
        if entry.index <= inner.last_index {
            return Ok(());
        }
        if !inner.entries.is_empty() && entry.index != inner.last_index.next() {
            return Err(ReplicationError::transport(format!(
                "log gap in {}: got index {}, expected {}",
                self.group_id,
                entry.index,
                inner.last_index.next()
            )));
        }
        inner.last_index = entry.index;
        inner.entries.insert(entry.index.as_u64(), entry);
        drop(inner);
        self.appended.notify_waiters();
        Ok(())
    }

    pub fn entry(&self, index: LogIndex) -> Option<LogEntry> {
        self.inner.read().entries.get(&index.as_u64()).cloned()
    }

    /// Entries with `from <= index <= to`, in index order.
    pub fn range(&self, from: LogIndex, to: LogIndex) -> Vec<LogEntry> {
        self.inner
            .read()
            .entries
            .range(from.as_u64()..=to.as_u64())
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn entries_from(&self, from: LogIndex) -> Vec<LogEntry> {
        self.inner
            .read()
            .entries
            .range(from.as_u64()..)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Index of the first retained entry, or zero when the log is empty.
    pub fn first_index(&self) -> LogIndex {
        self.inner
            .read()
            .entries
            .keys()
            .next()
            .map(|i| LogIndex::new(*i))
            .unwrap_or(LogIndex::ZERO)
    }

    pub fn last_index(&self) -> LogIndex {
        self.inner.read().last_index
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn anchor(&self) -> CompactionAnchor {
        self.inner.read().anchor.clone()
    }

    /// Discard entries with `index < lowest_index_to_keep` and record the
    /// compaction anchor: the position of the last discarded entry plus the
    /// shard schema at that point, so shard identity stays derivable
    /// without replay. Returns the number of entries discarded.
    pub fn compact(&self, lowest_index_to_keep: LogIndex, schema: Vec<ShardDescriptor>) -> u64 {
        let mut inner = self.inner.write();
        let cut = lowest_index_to_keep.as_u64();
        let discard: Vec<u64> = inner
            .entries
            .range(..cut)
            .map(|(i, _)| *i)
            .collect();
        if discard.is_empty() {
            return 0;
        }
        let last_discarded = *discard.last().unwrap_or(&0);
        let anchor_term = inner
            .entries
            .get(&last_discarded)
            .map(|e| e.term)
            .unwrap_or(Term::ZERO);
        for index in &discard {
            inner.entries.remove(index);
        }
        inner.anchor = CompactionAnchor {
            index: LogIndex::new(last_discarded),
            term: anchor_term,
            shards: schema,
        };
        log::info!(
            "LogStore[{}]: compacted {} entries, anchor now at {}",
            self.group_id,
            discard.len(),
            last_discarded
        );
        discard.len() as u64
    }

    /// Drop every entry and restart the log at `anchor`: the state below
    /// `anchor.index` now comes from an installed snapshot, and appends
    /// resume at `anchor.index + 1`.
    pub fn reset_to_anchor(&self, anchor: CompactionAnchor) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.last_index = anchor.index;
        inner.anchor = anchor;
    }

    /// Wait until the entry at `index` is present.
    pub async fn wait_for_entry(&self, index: LogIndex) {
        loop {
            let appended = self.appended.notified();
            if self.last_index() >= index {
                return;
            }
            appended.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plumedb_commons::{ShardId, ShardProperties};

    fn store() -> LogStore {
        LogStore::new(GroupId::new(1))
    }

    fn create_shard_op(name: &str) -> Operation {
        Operation::CreateShard {
            shard: ShardId::new(name),
            properties: ShardProperties::default(),
        }
    }

    #[test]
    fn test_append_assigns_increasing_indexes() {
        let log = store();
        assert_eq!(log.append(Term::new(1), Some(create_shard_op("s1"))), LogIndex::new(1));
        assert_eq!(log.append(Term::new(1), None), LogIndex::new(2));
        assert_eq!(log.last_index(), LogIndex::new(2));
        assert_eq!(log.first_index(), LogIndex::new(1));
        assert!(log.entry(LogIndex::new(2)).unwrap().is_term_marker());
    }

    #[test]
    fn test_follower_append_rejects_gaps_and_ignores_duplicates() {
        let log = store();
        let e1 = LogEntry::new(LogIndex::new(1), Term::new(1), create_shard_op("s1"));
        let e3 = LogEntry::new(LogIndex::new(3), Term::new(1), create_shard_op("s3"));
        log.append_entry(e1.clone()).unwrap();
        assert!(log.append_entry(e3).is_err());
        // Duplicate of an already-held index is a no-op.
        log.append_entry(e1).unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_follower_append_accepts_any_start_on_empty_log() {
        let log = store();
        let e10 = LogEntry::new(LogIndex::new(10), Term::new(2), create_shard_op("s1"));
        log.append_entry(e10).unwrap();
        assert_eq!(log.first_index(), LogIndex::new(10));
        assert_eq!(log.last_index(), LogIndex::new(10));
    }

    #[test]
    fn test_range_is_inclusive() {
        let log = store();
        for i in 0..5 {
            log.append(Term::new(1), Some(create_shard_op(&format!("s{}", i))));
        }
        let entries = log.range(LogIndex::new(2), LogIndex::new(4));
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].index, LogIndex::new(2));
        assert_eq!(entries[2].index, LogIndex::new(4));
    }

    #[test]
    fn test_compact_discards_prefix_and_sets_anchor() {
        let log = store();
        for i in 0..6 {
            log.append(Term::new(1), Some(create_shard_op(&format!("s{}", i))));
        }
        let schema = vec![ShardDescriptor {
            shard: ShardId::new("s0"),
            properties: ShardProperties::default(),
            indexes: vec![],
        }];
        let discarded = log.compact(LogIndex::new(4), schema.clone());
        assert_eq!(discarded, 3);
        assert_eq!(log.first_index(), LogIndex::new(4));
        assert_eq!(log.last_index(), LogIndex::new(6));
        let anchor = log.anchor();
        assert_eq!(anchor.index, LogIndex::new(3));
        assert_eq!(anchor.shards, schema);

        // Compacting below the anchor is a no-op.
        assert_eq!(log.compact(LogIndex::new(2), vec![]), 0);
        assert_eq!(log.anchor().index, LogIndex::new(3));
    }

    #[test]
    fn test_restore_resumes_after_anchor() {
        let log = store();
        for i in 0..4 {
            log.append(Term::new(1), Some(create_shard_op(&format!("s{}", i))));
        }
        log.compact(LogIndex::new(3), vec![]);
        let restored = LogStore::restore(GroupId::new(1), log.anchor(), log.entries_from(LogIndex::new(1)));
        assert_eq!(restored.first_index(), LogIndex::new(3));
        assert_eq!(restored.last_index(), LogIndex::new(4));
        assert_eq!(restored.anchor().index, LogIndex::new(2));
        // Appends continue from the restored tail.
        assert_eq!(restored.append(Term::new(2), None), LogIndex::new(5));
    }

    #[tokio::test]
    async fn test_wait_for_entry_wakes_on_append() {
        let log = std::sync::Arc::new(store());
        let waiter = {
            let log = log.clone();
            tokio::spawn(async move {
                log.wait_for_entry(LogIndex::new(1)).await;
                log.entry(LogIndex::new(1)).unwrap()
            })
        };
        tokio::task::yield_now().await;
        log.append(Term::new(1), Some(create_shard_op("s1")));
        let entry = waiter.await.unwrap();
        assert_eq!(entry.index, LogIndex::new(1));
    }
}
