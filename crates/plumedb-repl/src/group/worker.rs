//! The per-group apply task.
//!
//! One task per replica applies committed entries to the state machine in
//! strict index order and completes the waiters parked by the leader's
//! write path. It blocks on the commit watermark, then on entry arrival,
//! and parks entirely while a snapshot install is in progress.

use crate::error::ReplicationError;
use crate::group::replica::GroupReplica;
use crate::state_machine::{ApplyMode, ApplyOutcome};
use plumedb_commons::LogIndex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub fn spawn_apply_loop(replica: Arc<GroupReplica>) -> JoinHandle<()> {
    tokio::spawn(run_apply_loop(replica))
}

pub async fn run_apply_loop(replica: Arc<GroupReplica>) {
    let mut shutdown = replica.shutdown_signal();
    let group_id = replica.group_id();
    log::debug!("ApplyLoop[{}]: started", group_id);

    loop {
        let next = replica.applied.get().next();

        tokio::select! {
            _ = replica.commit.wait_for(next) => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        // Park while a snapshot install owns the state machine.
        while replica.paused.load(Ordering::Acquire) {
            let resumed = replica.resume.notified();
            if !replica.paused.load(Ordering::Acquire) {
                break;
            }
            tokio::select! {
                _ = resumed => {}
                _ = shutdown.changed() => return,
            }
        }

        // A snapshot install may have advanced the applied watermark past
        // the index we were waiting for.
        if replica.applied.get() >= next {
            continue;
        }

        tokio::select! {
            _ = replica.log().wait_for_entry(next) => {}
            _ = shutdown.changed() => break,
        }

        let entry = match replica.log().entry(next) {
            Some(entry) => entry,
            None => {
                // Compacted out from under us (possible only when another
                // path already applied past this index).
                replica.note_local_applied(next);
                continue;
            }
        };

        let outcome = replica.with_machine(|machine| {
            if machine.last_applied() >= next {
                // Recovery replay got here first.
                return Ok(ApplyOutcome::Applied);
            }
            machine.apply(&entry, ApplyMode::Forward)
        });

        match outcome {
            Ok(outcome) => {
                replica.note_local_applied(next);
                deliver_waiter(&replica, next, outcome);
            }
            Err(error) => {
                // Forward apply only errs on non-storage conditions; the
                // loop cannot continue past an unapplied entry.
                log::error!("ApplyLoop[{}]: apply of {} failed: {}", group_id, next, error);
                deliver_error(&replica, next, error);
                break;
            }
        }
    }

    log::debug!("ApplyLoop[{}]: stopped", group_id);
}

fn deliver_waiter(replica: &GroupReplica, index: LogIndex, outcome: ApplyOutcome) {
    if let Some((_, sender)) = replica.waiters.remove(&index.as_u64()) {
        let result = match outcome {
            ApplyOutcome::Applied | ApplyOutcome::TermMarker => Ok(()),
            ApplyOutcome::TrxClosed { error: None, .. } => Ok(()),
            ApplyOutcome::TrxClosed { error: Some(e), .. } => Err(e.into()),
            ApplyOutcome::Failed(e) => Err(e.into()),
            ApplyOutcome::Tolerated(e) => Err(e.into()),
        };
        let _ = sender.send(result);
    }
}

fn deliver_error(replica: &GroupReplica, index: LogIndex, error: ReplicationError) {
    if let Some((_, sender)) = replica.waiters.remove(&index.as_u64()) {
        let _ = sender.send(Err(error));
    }
}
