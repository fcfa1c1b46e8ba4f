//! One shard group on one node: the replica and its apply loop.

pub mod replica;
pub mod worker;

pub use replica::{GroupReplica, Leadership, WriteOutcome};
