//! Watermark coordination between the append path and the apply loop.
//!
//! A coordinator is an atomic index plus a Notify. Writers advance it with
//! `advance_to` (monotonic, fetch_max); the apply loop and submit futures
//! block on `wait_for` until the watermark passes their target.

use plumedb_commons::LogIndex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

#[derive(Debug)]
pub struct IndexCoordinator {
    index: AtomicU64,
    notify: Notify,
}

impl IndexCoordinator {
    pub fn new(initial: LogIndex) -> Self {
        IndexCoordinator {
            index: AtomicU64::new(initial.as_u64()),
            notify: Notify::new(),
        }
    }

    pub fn get(&self) -> LogIndex {
        LogIndex::new(self.index.load(Ordering::Acquire))
    }

    /// Raise the watermark to `target` if it is higher than the current
    /// value, waking all waiters. Returns whether the watermark moved.
    pub fn advance_to(&self, target: LogIndex) -> bool {
        let prev = self.index.fetch_max(target.as_u64(), Ordering::AcqRel);
        let raised = prev < target.as_u64();
        if raised {
            self.notify.notify_waiters();
        }
        raised
    }

    /// Wait until the watermark reaches at least `target`.
    pub async fn wait_for(&self, target: LogIndex) {
        loop {
            let notified = self.notify.notified();
            if self.get() >= target {
                return;
            }
            notified.await;
        }
    }
}

impl Default for IndexCoordinator {
    fn default() -> Self {
        IndexCoordinator::new(LogIndex::ZERO)
    }
}
