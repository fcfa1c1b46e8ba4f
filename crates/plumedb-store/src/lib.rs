//! # plumedb-store
//!
//! Materialized shard contents: the state that results from applying a
//! replicated log. Documents live in ordered maps keyed by `_key`, with
//! secondary indexes maintained alongside every mutation.
//!
//! This crate knows nothing about replication. It is driven by the state
//! machine in `plumedb-repl`, which applies committed log entries one at a
//! time per log, so the structures here are optimized for single-writer
//! access and cheap point-in-time views (documents are shared via `Arc`,
//! a view clones the key maps but not the documents).

pub mod error;
pub mod index;
pub mod shard;
pub mod shard_set;

pub use error::{Result, StorageError};
pub use index::ShardIndex;
pub use shard::ShardStore;
pub use shard_set::{ShardSet, ShardSetView, ShardView};
