//! # PlumeDB Commons
//!
//! Shared types used across the PlumeDB crates: strongly typed identifiers
//! (participants, shards, log positions), the document model, and shard
//! schema descriptions (properties, computed values, index definitions).
//!
//! Everything in here is plain data. Behavior lives in `plumedb-store`
//! (materialized shard contents) and `plumedb-repl` (the replicated log).

pub mod models;

// Re-export the most commonly used types at the crate root.
pub use models::document::{DocValue, Document, DocumentKey, Revision};
pub use models::group_id::GroupId;
pub use models::ids::{LogIndex, RebootId, Term, TrxId};
pub use models::participant_id::ParticipantId;
pub use models::schema::{ComputeOn, ComputedValue, IndexDefinition, IndexId, ShardProperties};
pub use models::shard_id::ShardId;
pub use models::snapshot_id::SnapshotId;
