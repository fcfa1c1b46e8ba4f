//! Outbound hooks towards the cluster control plane.
//!
//! The replication core does not talk to an agency itself; it reports
//! through this trait and the embedding server decides where the reports
//! go. Status publication is fire-and-forget, resignation is awaited so a
//! stepping-down leader can stop accepting writes before the new term
//! starts elsewhere.

use crate::participants::LogStatusReport;
use async_trait::async_trait;
use plumedb_commons::{GroupId, Term};
use std::sync::Arc;

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Periodic (and on-change) publication of a group's replication state.
    fn publish_status(&self, report: LogStatusReport);

    /// The local participant stopped leading `group` in `term`.
    async fn leadership_resigned(&self, group: GroupId, term: Term);
}

/// Control plane that discards everything. Default for embedded and
/// single-node deployments.
#[derive(Debug, Default)]
pub struct NoOpControlPlane;

#[async_trait]
impl ControlPlane for NoOpControlPlane {
    fn publish_status(&self, _report: LogStatusReport) {}

    async fn leadership_resigned(&self, group: GroupId, term: Term) {
        log::debug!("ControlPlane: leadership resigned for {} in term {}", group, term);
    }
}

/// Control plane that records every call, for tests.
#[derive(Debug, Default)]
pub struct RecordingControlPlane {
    reports: parking_lot::Mutex<Vec<LogStatusReport>>,
    resignations: parking_lot::Mutex<Vec<(GroupId, Term)>>,
}

impl RecordingControlPlane {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingControlPlane::default())
    }

    pub fn reports(&self) -> Vec<LogStatusReport> {
        self.reports.lock().clone()
    }

    pub fn resignations(&self) -> Vec<(GroupId, Term)> {
        self.resignations.lock().clone()
    }
}

#[async_trait]
impl ControlPlane for RecordingControlPlane {
    fn publish_status(&self, report: LogStatusReport) {
        self.reports.lock().push(report);
    }

    async fn leadership_resigned(&self, group: GroupId, term: Term) {
        self.resignations.lock().push((group, term));
    }
}
