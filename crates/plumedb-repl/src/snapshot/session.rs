//! Leader-side snapshot session for one follower.
//!
//! The session captures a point-in-time view of every shard at creation
//! (cheap: documents are shared, not copied) and serves it in key-ordered
//! batches. Serving runs off the apply loop's task; live writes continue
//! against the mutable shard set without affecting the view.

use crate::snapshot::types::{SnapshotBatch, SnapshotManifest, SnapshotStatus};
use crate::state_machine::ShardDescriptor;
use chrono::{DateTime, Utc};
use plumedb_commons::{DocumentKey, GroupId, LogIndex, ParticipantId, RebootId, ShardId, SnapshotId, Term};
use plumedb_store::ShardSetView;

#[derive(Debug)]
pub struct SnapshotSession {
    snapshot_id: SnapshotId,
    group_id: GroupId,
    follower: ParticipantId,
    follower_reboot: RebootId,
    spearhead_index: LogIndex,
    term: Term,
    view: ShardSetView,
    shard_order: Vec<ShardId>,
    cursor_shard: usize,
    cursor_key: Option<DocumentKey>,
    batches_sent: u64,
    documents_sent: u64,
    started_at: DateTime<Utc>,
}

impl SnapshotSession {
    pub fn new(
        snapshot_id: SnapshotId,
        group_id: GroupId,
        follower: ParticipantId,
        follower_reboot: RebootId,
        view: ShardSetView,
        spearhead_index: LogIndex,
        term: Term,
    ) -> Self {
        let shard_order: Vec<ShardId> = view.shards().map(|s| s.id().clone()).collect();
        SnapshotSession {
            snapshot_id,
            group_id,
            follower,
            follower_reboot,
            spearhead_index,
            term,
            view,
            shard_order,
            cursor_shard: 0,
            cursor_key: None,
            batches_sent: 0,
            documents_sent: 0,
            started_at: Utc::now(),
        }
    }

    pub fn snapshot_id(&self) -> &SnapshotId {
        &self.snapshot_id
    }

    pub fn follower(&self) -> &ParticipantId {
        &self.follower
    }

    pub fn follower_reboot(&self) -> RebootId {
        self.follower_reboot
    }

    pub fn spearhead_index(&self) -> LogIndex {
        self.spearhead_index
    }

    pub fn manifest(&self) -> SnapshotManifest {
        let shards = self
            .view
            .shards()
            .map(|s| ShardDescriptor {
                shard: s.id().clone(),
                properties: s.properties().clone(),
                indexes: s.index_definitions().to_vec(),
            })
            .collect();
        SnapshotManifest {
            snapshot_id: self.snapshot_id.clone(),
            group_id: self.group_id,
            spearhead_index: self.spearhead_index,
            term: self.term,
            shards,
            total_documents: self.view.total_documents() as u64,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor_shard >= self.shard_order.len()
    }

    /// Produce the next batch of at most `batch_size` documents, or `None`
    /// when every shard has been streamed.
    pub fn next_batch(&mut self, batch_size: usize) -> Option<SnapshotBatch> {
        while self.cursor_shard < self.shard_order.len() {
            let shard_id = self.shard_order[self.cursor_shard].clone();
            let docs = match self.view.shard(&shard_id) {
                Some(shard) => shard.documents_after(self.cursor_key.as_ref(), batch_size),
                None => Vec::new(),
            };
            if docs.is_empty() {
                self.cursor_shard += 1;
                self.cursor_key = None;
                continue;
            }
            if let Some(last) = docs.last() {
                self.cursor_key = Some(last.key.clone());
            }
            if docs.len() < batch_size {
                // Shard exhausted; the next call moves on.
                self.cursor_shard += 1;
                self.cursor_key = None;
            }
            self.batches_sent += 1;
            self.documents_sent += docs.len() as u64;
            return Some(SnapshotBatch {
                snapshot_id: self.snapshot_id.clone(),
                shard: shard_id,
                documents: docs.iter().map(|d| (**d).clone()).collect(),
            });
        }
        None
    }

    pub fn status(&self) -> SnapshotStatus {
        SnapshotStatus {
            snapshot_id: self.snapshot_id.clone(),
            follower: self.follower.clone(),
            spearhead_index: self.spearhead_index,
            batches_sent: self.batches_sent,
            documents_sent: self.documents_sent,
            exhausted: self.is_exhausted(),
            started_at: self.started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plumedb_commons::{Document, Revision, ShardProperties};
    use plumedb_store::ShardSet;
    use serde_json::json;

    fn populated_view(counts: &[(&str, usize)]) -> ShardSetView {
        let mut set = ShardSet::new();
        for (name, count) in counts {
            set.create_shard(ShardId::new(*name), ShardProperties::default()).unwrap();
            let store = set.shard_mut(&ShardId::new(*name)).unwrap();
            for i in 0..*count {
                let doc = Document::from_json(
                    DocumentKey::new(format!("k{:04}", i)),
                    Revision::new(i as u64 + 1),
                    &json!({"i": i}),
                )
                .unwrap();
                store.insert(doc).unwrap();
            }
        }
        set.view()
    }

    fn session(view: ShardSetView) -> SnapshotSession {
        SnapshotSession::new(
            SnapshotId::generate(),
            GroupId::new(1),
            ParticipantId::new("f1"),
            RebootId::new(1),
            view,
            LogIndex::new(12),
            Term::new(2),
        )
    }

    #[test]
    fn test_manifest_lists_all_shards() {
        let s = session(populated_view(&[("s1", 3), ("s2", 0)]));
        let manifest = s.manifest();
        assert_eq!(manifest.shards.len(), 2);
        assert_eq!(manifest.total_documents, 3);
        assert_eq!(manifest.spearhead_index, LogIndex::new(12));
    }

    #[test]
    fn test_batches_cover_everything_without_duplicates() {
        let mut s = session(populated_view(&[("s1", 7), ("s2", 3)]));
        let mut seen = Vec::new();
        while let Some(batch) = s.next_batch(3) {
            assert!(batch.documents.len() <= 3);
            for doc in &batch.documents {
                seen.push((batch.shard.clone(), doc.key.clone()));
            }
        }
        assert_eq!(seen.len(), 10);
        let unique: std::collections::BTreeSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 10);
        assert!(s.is_exhausted());
        assert!(s.next_batch(3).is_none());

        let status = s.status();
        assert_eq!(status.documents_sent, 10);
        assert!(status.exhausted);
    }

    #[test]
    fn test_empty_shards_stream_no_batches() {
        let mut s = session(populated_view(&[("s1", 0)]));
        assert!(s.next_batch(5).is_none());
        assert!(s.is_exhausted());
    }
}
