//! Log replay performed by a fresh leader before it serves traffic.
//!
//! A follower that takes over leadership may trail the commit index. It
//! replays the committed suffix of its log in recovery mode, where errors
//! caused by ordinary log truncation (a write whose transaction outcome was
//! compacted away, a delete of an already absent document) are tolerated
//! and recorded rather than treated as divergence.

use crate::error::{ReplicationError, Result};
use crate::log::LogStore;
use crate::state_machine::{ApplyMode, ApplyOutcome, GroupStateMachine};
use plumedb_commons::{GroupId, LogIndex, Term};
use plumedb_store::StorageError;

/// A storage error that recovery skipped over.
#[derive(Debug, Clone)]
pub struct ToleratedFault {
    pub index: LogIndex,
    pub operation: &'static str,
    pub error: StorageError,
}

#[derive(Debug, Clone)]
pub struct RecoveryReport {
    pub group_id: GroupId,
    pub term: Term,
    pub start_index: LogIndex,
    pub end_index: LogIndex,
    pub replayed: u64,
    pub tolerated: Vec<ToleratedFault>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.tolerated.is_empty()
    }
}

pub struct RecoveryProcedure;

impl RecoveryProcedure {
    /// Replay committed entries the state machine has not applied yet.
    ///
    /// Advances the machine to `commit_index`. An intolerable error aborts
    /// the whole procedure; the caller must not assume leadership in that
    /// case.
    pub fn run(
        log: &LogStore,
        machine: &mut GroupStateMachine,
        commit_index: LogIndex,
        term: Term,
    ) -> Result<RecoveryReport> {
        let group_id = machine.group_id();
        let start_index = machine.last_applied().next();
        let mut report = RecoveryReport {
            group_id,
            term,
            start_index,
            end_index: commit_index,
            replayed: 0,
            tolerated: Vec::new(),
        };

        if start_index > commit_index {
            log::info!(
                "Recovery[{}]: nothing to replay, applied={} commit={}",
                group_id,
                machine.last_applied(),
                commit_index
            );
            return Ok(report);
        }

        log::info!(
            "Recovery[{}]: replaying {}..={} for term {}",
            group_id,
            start_index,
            commit_index,
            term
        );

        for entry in log.range(start_index, commit_index) {
            let kind = entry.kind();
            let index = entry.index;
            let outcome = machine.apply(&entry, ApplyMode::Recovery).map_err(|e| {
                ReplicationError::RecoveryFailed {
                    group: group_id.to_string(),
                    term: term.as_u64(),
                    reason: format!("entry {index} ({kind}): {e}"),
                }
            })?;
            report.replayed += 1;
            if let ApplyOutcome::Tolerated(error) = outcome {
                report.tolerated.push(ToleratedFault {
                    index,
                    operation: kind,
                    error,
                });
            }
        }

        if report.is_clean() {
            log::info!(
                "Recovery[{}]: replayed {} entries cleanly",
                group_id,
                report.replayed
            );
        } else {
            log::warn!(
                "Recovery[{}]: replayed {} entries, {} tolerated faults",
                group_id,
                report.replayed,
                report.tolerated.len()
            );
        }
        Ok(report)
    }
}
