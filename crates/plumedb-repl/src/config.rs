//! Runtime configuration for the replication layer.
//!
//! TOML-friendly: every field has a serde default so partial config files
//! work, and durations are carried as integer milliseconds.

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_replication_factor() -> usize {
    2
}

fn default_write_concern_floor() -> usize {
    1
}

fn default_count_leader_ack() -> bool {
    true
}

fn default_intermediate_commit_count() -> usize {
    1000
}

fn default_truncate_threshold() -> usize {
    32768
}

fn default_snapshot_batch_size() -> usize {
    5000
}

fn default_commit_timeout_ms() -> u64 {
    10_000
}

/// Configuration shared by every shard-group replica on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Target number of participants acknowledging a write before commit.
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    /// Hard lower bound on the commit quorum. The effective write concern
    /// shrinks toward this floor when participants drop out of the quorum
    /// pool, never below it.
    #[serde(default = "default_write_concern_floor")]
    pub write_concern_floor: usize,

    /// Whether the leader's own durable append counts toward the quorum.
    #[serde(default = "default_count_leader_ack")]
    pub count_leader_ack: bool,

    /// Document count after which a logical write is split across several
    /// log entries interleaved with IntermediateCommit markers.
    #[serde(default = "default_intermediate_commit_count")]
    pub intermediate_commit_count: usize,

    /// Shards holding more documents than this replicate a truncation as a
    /// single Truncate entry; smaller ones replicate Remove batches instead.
    #[serde(default = "default_truncate_threshold")]
    pub truncate_threshold: usize,

    /// Documents per snapshot transfer batch.
    #[serde(default = "default_snapshot_batch_size")]
    pub snapshot_batch_size: usize,

    /// How long a submitted write may wait for quorum acknowledgement and
    /// local apply before it is reported as failed.
    #[serde(default = "default_commit_timeout_ms")]
    pub commit_timeout_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            replication_factor: default_replication_factor(),
            write_concern_floor: default_write_concern_floor(),
            count_leader_ack: default_count_leader_ack(),
            intermediate_commit_count: default_intermediate_commit_count(),
            truncate_threshold: default_truncate_threshold(),
            snapshot_batch_size: default_snapshot_batch_size(),
            commit_timeout_ms: default_commit_timeout_ms(),
        }
    }
}

impl ReplicationConfig {
    /// Configuration for a standalone node: quorum of one, same code path
    /// as a cluster deployment.
    pub fn for_single_node() -> Self {
        Self {
            replication_factor: 1,
            write_concern_floor: 1,
            ..Self::default()
        }
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.write_concern_floor == 0 {
            return Err(ReplicationError::invalid_state(
                "write_concern_floor must be at least 1",
            ));
        }
        if self.replication_factor < self.write_concern_floor {
            return Err(ReplicationError::invalid_state(format!(
                "replication_factor {} is below write_concern_floor {}",
                self.replication_factor, self.write_concern_floor
            )));
        }
        if self.intermediate_commit_count == 0 || self.snapshot_batch_size == 0 {
            return Err(ReplicationError::invalid_state(
                "batch sizes must be at least 1",
            ));
        }
        Ok(())
    }
}
