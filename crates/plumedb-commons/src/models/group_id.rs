//! Identifier of a shard group and its replicated log.
//!
//! Every shard group owns exactly one log, so the same id names both.
//! Assignment of shards to groups is decided by the control plane when a
//! shard is created ("distribute like" placement ends up as two shards
//! carrying the same `GroupId`).

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub struct GroupId(u64);

impl GroupId {
    pub fn new(value: u64) -> Self {
        GroupId(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group/{}", self.0)
    }
}

impl From<u64> for GroupId {
    fn from(value: u64) -> Self {
        GroupId(value)
    }
}
