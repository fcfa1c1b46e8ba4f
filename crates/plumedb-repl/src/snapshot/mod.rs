//! Snapshot transfer: bootstrapping a follower directly from shard
//! contents when log replay cannot catch it up.

pub mod manager;
pub mod session;
pub mod types;

pub use manager::SnapshotManager;
pub use session::SnapshotSession;
pub use types::{SnapshotBatch, SnapshotManifest, SnapshotStatus};
