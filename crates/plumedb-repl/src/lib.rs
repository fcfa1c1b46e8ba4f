//! PlumeDB Replication Core
//!
//! Per-shard-group replicated state machines: every mutation of a shard
//! group travels as an entry of that group's replicated log, and every
//! participant applies committed entries in index order, so shard contents
//! converge deterministically across replicas.
//!
//! ## Key Components
//!
//! - [`Operation`]: the replicated payload; fully resolved on the leader
//! - [`LogStore`]: index-addressed entry sequence with prefix compaction
//! - [`GroupStateMachine`]: applies entries to shard contents, forward or
//!   in recovery mode
//! - [`ParticipantTable`]: per-participant watermarks, the effective write
//!   concern and the quorum commit index
//! - [`GroupReplica`]: one group on one node; leader write path, follower
//!   ingest, snapshot transfer and compaction
//! - [`ReplicationManager`]: all groups on one node plus shard routing
//!
//! ## Usage
//!
//! ```rust,ignore
//! let manager = ReplicationManager::single_node(
//!     ParticipantId::new("dbserver-1"),
//!     RebootId::new(1),
//! );
//! let group = manager.create_group(GroupId::new(1))?;
//! group.become_leader(Term::new(1))?;
//! manager.create_shard(ShardId::new("accounts"), GroupId::new(1), props).await?;
//! let outcome = manager.insert(&shard, vec![json!({"balance": 10})]).await?;
//! ```

pub mod codec;
pub mod commit;
pub mod compaction;
pub mod config;
pub mod control_plane;
pub mod durable;
pub mod error;
pub mod group;
pub mod log;
pub mod manager;
pub mod operation;
pub mod participants;
pub mod recovery;
pub mod snapshot;
pub mod state_machine;
pub mod transaction;

pub use compaction::{CompactionAnchor, CompactionReport};
pub use config::ReplicationConfig;
pub use control_plane::{ControlPlane, NoOpControlPlane, RecordingControlPlane};
pub use durable::GroupDurableState;
pub use error::{ReplicationError, Result};
pub use group::{GroupReplica, Leadership, WriteOutcome};
pub use log::{LogEntry, LogStore};
pub use manager::ReplicationManager;
pub use operation::Operation;
pub use participants::{
    LogStatusReport, ParticipantRole, ParticipantState, ParticipantStatus, ParticipantTable,
};
pub use recovery::{RecoveryProcedure, RecoveryReport, ToleratedFault};
pub use snapshot::{SnapshotBatch, SnapshotManager, SnapshotManifest, SnapshotStatus};
pub use state_machine::{ApplyMode, ApplyOutcome, GroupStateMachine, ShardDescriptor};
pub use transaction::{Transaction, TransactionTracker};
