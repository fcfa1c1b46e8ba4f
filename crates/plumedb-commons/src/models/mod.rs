//! Data model types shared across PlumeDB crates.

pub mod document;
pub mod group_id;
pub mod ids;
pub mod participant_id;
pub mod schema;
pub mod shard_id;
pub mod snapshot_id;

pub use document::{DocValue, Document, DocumentKey, Revision};
pub use group_id::GroupId;
pub use ids::{LogIndex, RebootId, Term, TrxId};
pub use participant_id::ParticipantId;
pub use schema::{ComputeOn, ComputedValue, IndexDefinition, IndexId, ShardProperties};
pub use shard_id::ShardId;
pub use snapshot_id::SnapshotId;
