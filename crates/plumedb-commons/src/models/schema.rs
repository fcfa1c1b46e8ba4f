//! Shard schema descriptions: properties, computed values and indexes.
//!
//! These travel inside replicated log entries (CreateShard, ModifyShard,
//! CreateIndex) and snapshot manifests, so replicas converge on the same
//! schema by replaying the same entries.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mutable per-shard settings, replaced wholesale by ModifyShard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, Default)]
pub struct ShardProperties {
    /// When true, the leader only acknowledges a write once it is durable
    /// on the acknowledging participants.
    #[serde(default)]
    pub wait_for_sync: bool,
    /// Computed value rules. Stored and replicated as schema; evaluation
    /// happens upstream of replication so replicas never re-run expressions.
    #[serde(default)]
    pub computed_values: Vec<ComputedValue>,
}

/// A single computed value rule, attached to a shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct ComputedValue {
    pub name: String,
    pub expression: String,
    /// Overwrite a client-supplied attribute of the same name.
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default = "ComputedValue::default_compute_on")]
    pub compute_on: Vec<ComputeOn>,
}

impl ComputedValue {
    fn default_compute_on() -> Vec<ComputeOn> {
        vec![ComputeOn::Insert, ComputeOn::Update, ComputeOn::Replace]
    }
}

/// Which write kinds a computed value rule fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
#[serde(rename_all = "lowercase")]
pub enum ComputeOn {
    Insert,
    Update,
    Replace,
}

/// Identifier of a secondary index within its shard.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub struct IndexId(u64);

impl IndexId {
    pub fn new(value: u64) -> Self {
        IndexId(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "idx/{}", self.0)
    }
}

impl From<u64> for IndexId {
    fn from(value: u64) -> Self {
        IndexId(value)
    }
}

/// Definition of a secondary index over one or more attribute paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct IndexDefinition {
    pub id: IndexId,
    pub name: String,
    /// Dotted attribute paths, e.g. `["address.city"]`.
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    /// Sparse indexes skip documents missing any of the indexed fields.
    #[serde(default)]
    pub sparse: bool,
}
