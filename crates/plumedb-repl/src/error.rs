//! Error types for the replication layer.

use plumedb_commons::LogIndex;
use plumedb_store::StorageError;
use thiserror::Error;

/// Result type for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur in the replication layer.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The local participant is not the leader for this group
    #[error("Not leader for group {group}: leader is {leader:?}")]
    NotLeader {
        group: String,
        leader: Option<String>,
    },

    /// Shard group not found on this node
    #[error("Shard group not found: {0}")]
    GroupNotFound(String),

    /// Shard group already exists on this node
    #[error("Shard group already exists: {0}")]
    GroupAlreadyExists(String),

    /// Shard is not mapped to any group on this node
    #[error("Shard not mapped to a group: {0}")]
    ShardNotMapped(String),

    /// Storage error from applying an operation to shard contents
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Failed to serialize/deserialize
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Commit stalled below the effective write concern within the timeout
    #[error(
        "Write concern not reached for group {group}: required {required} \
         acknowledgements, commit stalled at index {commit_index}"
    )]
    WriteConcernNotReached {
        group: String,
        required: usize,
        commit_index: LogIndex,
    },

    /// Snapshot session id is unknown
    #[error("Snapshot session not found: {0}")]
    SnapshotNotFound(String),

    /// Snapshot session was discarded (reboot mismatch or explicit abort)
    #[error("Snapshot session {snapshot_id} invalidated: {reason}")]
    SnapshotInvalidated {
        snapshot_id: String,
        reason: String,
    },

    /// A live snapshot session already exists for this follower
    #[error("Snapshot session already open for follower {0}")]
    SnapshotAlreadyOpen(String),

    /// Session start carried a reboot id older than the follower's current one
    #[error("Stale reboot id for follower {follower}: got {got}, current is {current}")]
    StaleRebootId {
        follower: String,
        got: u64,
        current: u64,
    },

    /// Recovery replay hit an error outside the tolerance list
    #[error("Recovery failed for group {group} in term {term}: {reason}")]
    RecoveryFailed {
        group: String,
        term: u64,
        reason: String,
    },

    /// Append/replication transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The replica is shutting down
    #[error("Replica is shutting down")]
    Shutdown,

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl ReplicationError {
    /// Create a NotLeader error
    pub fn not_leader(group: impl Into<String>, leader: Option<String>) -> Self {
        ReplicationError::NotLeader {
            group: group.into(),
            leader,
        }
    }

    /// Create a Transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        ReplicationError::Transport(msg.into())
    }

    /// Create an InvalidState error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        ReplicationError::InvalidState(msg.into())
    }

    /// Returns true if retrying against the (possibly new) leader might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReplicationError::NotLeader { .. } | ReplicationError::Transport(_)
        )
    }

    /// Returns true for errors the recovery procedure logs and skips instead
    /// of aborting: a precondition violated only because compaction already
    /// discarded the entries that would have explained it. Covers not-found
    /// on remove/update, unique violations on insert/replace, and lifecycle
    /// operations replayed against already-converged schema.
    pub fn is_tolerable_during_recovery(&self) -> bool {
        match self {
            ReplicationError::Storage(e) => !matches!(e, StorageError::InvalidDocument(_)),
            _ => false,
        }
    }

    /// Returns the leader hint if this is a NotLeader error
    pub fn leader_hint(&self) -> Option<&str> {
        if let ReplicationError::NotLeader { leader, .. } = self {
            leader.as_deref()
        } else {
            None
        }
    }
}

impl From<bincode::error::EncodeError> for ReplicationError {
    fn from(err: bincode::error::EncodeError) -> Self {
        ReplicationError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for ReplicationError {
    fn from(err: bincode::error::DecodeError) -> Self {
        ReplicationError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerable_classification() {
        let not_found: ReplicationError = StorageError::DocumentNotFound("k".into()).into();
        assert!(not_found.is_tolerable_during_recovery());

        let unique: ReplicationError = StorageError::UniqueConstraintViolation("x".into()).into();
        assert!(unique.is_tolerable_during_recovery());

        let shard_gone: ReplicationError = StorageError::ShardNotFound("s".into()).into();
        assert!(shard_gone.is_tolerable_during_recovery());

        let exists: ReplicationError = StorageError::ShardAlreadyExists("s".into()).into();
        assert!(exists.is_tolerable_during_recovery());

        let bad_doc: ReplicationError = StorageError::InvalidDocument("oops".into()).into();
        assert!(!bad_doc.is_tolerable_during_recovery());

        assert!(!ReplicationError::Shutdown.is_tolerable_during_recovery());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ReplicationError::not_leader("group/1", None).is_retryable());
        assert!(ReplicationError::transport("connection reset").is_retryable());
        assert!(!ReplicationError::Shutdown.is_retryable());
        assert!(!ReplicationError::WriteConcernNotReached {
            group: "group/1".into(),
            required: 2,
            commit_index: LogIndex::new(4),
        }
        .is_retryable());
    }

    #[test]
    fn test_leader_hint() {
        let err = ReplicationError::not_leader("group/1", Some("dbserver-2".into()));
        assert_eq!(err.leader_hint(), Some("dbserver-2"));
        assert_eq!(ReplicationError::Shutdown.leader_hint(), None);
    }
}
