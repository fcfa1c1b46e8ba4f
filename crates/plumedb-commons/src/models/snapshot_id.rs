//! Identifier of a snapshot transfer session.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Random id minted by the leader when a follower starts a snapshot
/// session. Opaque to the follower; it only echoes it back on batch
/// requests.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub struct SnapshotId(String);

impl SnapshotId {
    /// Mint a fresh snapshot id.
    pub fn generate() -> Self {
        SnapshotId(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        SnapshotId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SnapshotId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SnapshotId {
    fn from(value: &str) -> Self {
        SnapshotId(value.to_string())
    }
}

impl From<String> for SnapshotId {
    fn from(value: String) -> Self {
        SnapshotId(value)
    }
}
