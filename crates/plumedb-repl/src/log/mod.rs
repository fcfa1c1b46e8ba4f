//! The replicated log: entries and the per-group log store.

pub mod entry;
pub mod store;

pub use entry::LogEntry;
pub use store::LogStore;
