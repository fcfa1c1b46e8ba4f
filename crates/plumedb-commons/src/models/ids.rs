//! Integer-valued identifier newtypes used by the replicated log.
//!
//! All of these wrap a `u64` and are ordered, copyable and serializable.
//! Zero is reserved as the "nothing yet" value for `LogIndex` and `Term`
//! (the first real log entry has index 1, the first real term is 1).

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of an entry in a replicated log. 1-based; 0 means "no entry".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode, Default,
)]
pub struct LogIndex(u64);

impl LogIndex {
    pub const ZERO: LogIndex = LogIndex(0);

    pub fn new(value: u64) -> Self {
        LogIndex(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// The next position after this one.
    pub fn next(&self) -> LogIndex {
        LogIndex(self.0 + 1)
    }

    /// The previous position, or `None` when already at zero.
    pub fn prev(&self) -> Option<LogIndex> {
        self.0.checked_sub(1).map(LogIndex)
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for LogIndex {
    fn from(value: u64) -> Self {
        LogIndex(value)
    }
}

/// Leadership epoch assigned by the control plane. Strictly increasing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode, Default,
)]
pub struct Term(u64);

impl Term {
    pub const ZERO: Term = Term(0);

    pub fn new(value: u64) -> Self {
        Term(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Term {
        Term(self.0 + 1)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Term {
    fn from(value: u64) -> Self {
        Term(value)
    }
}

/// Identifier of a write transaction inside one log. Assigned by the leader.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub struct TrxId(u64);

impl TrxId {
    pub fn new(value: u64) -> Self {
        TrxId(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trx/{}", self.0)
    }
}

impl From<u64> for TrxId {
    fn from(value: u64) -> Self {
        TrxId(value)
    }
}

/// Process incarnation counter of a participant. Bumped on every restart,
/// never reused. Used to detect that a peer restarted and that any state
/// negotiated with its previous incarnation (snapshot sessions in
/// particular) is void.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode, Default,
)]
pub struct RebootId(u64);

impl RebootId {
    pub fn new(value: u64) -> Self {
        RebootId(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The incarnation after a restart.
    pub fn bumped(&self) -> RebootId {
        RebootId(self.0 + 1)
    }
}

impl fmt::Display for RebootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reboot/{}", self.0)
    }
}

impl From<u64> for RebootId {
    fn from(value: u64) -> Self {
        RebootId(value)
    }
}
