//! Wire types of the snapshot transfer protocol.

use crate::state_machine::ShardDescriptor;
use chrono::{DateTime, Utc};
use plumedb_commons::{Document, GroupId, LogIndex, ParticipantId, ShardId, SnapshotId, Term};
use serde::{Deserialize, Serialize};

/// First deliverable of a session: everything the follower needs to set up
/// empty shards before document batches arrive, plus the spearhead index
/// from which it will resume log replay afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub snapshot_id: SnapshotId,
    pub group_id: GroupId,
    /// The leader's applied index at session start; the snapshot reflects
    /// exactly this point, and replay resumes at the entry after it.
    pub spearhead_index: LogIndex,
    pub term: Term,
    pub shards: Vec<ShardDescriptor>,
    pub total_documents: u64,
}

/// One chunk of documents for one shard. Applied by the follower with
/// overwrite semantics, not through the Insert path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBatch {
    pub snapshot_id: SnapshotId,
    pub shard: ShardId,
    pub documents: Vec<Document>,
}

/// Queryable progress of a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotStatus {
    pub snapshot_id: SnapshotId,
    pub follower: ParticipantId,
    pub spearhead_index: LogIndex,
    pub batches_sent: u64,
    pub documents_sent: u64,
    /// All batches have been produced; finish is the expected next call.
    pub exhausted: bool,
    pub started_at: DateTime<Utc>,
}
