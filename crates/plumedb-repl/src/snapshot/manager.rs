//! Leader-side registry of snapshot sessions.
//!
//! Enforces the session protocol: at most one live session per follower,
//! stale reboot ids rejected, and sessions invalidated the moment the
//! follower is known to have restarted. Invalidated session ids are kept
//! as tombstones so later status or finish calls on them report the error
//! instead of "not found".

use crate::error::{ReplicationError, Result};
use crate::snapshot::session::SnapshotSession;
use crate::snapshot::types::{SnapshotBatch, SnapshotManifest, SnapshotStatus};
use dashmap::DashMap;
use plumedb_commons::{GroupId, LogIndex, ParticipantId, RebootId, SnapshotId, Term};
use plumedb_store::ShardSetView;

#[derive(Debug)]
pub struct SnapshotManager {
    group_id: GroupId,
    batch_size: usize,
    sessions: DashMap<SnapshotId, SnapshotSession>,
    by_follower: DashMap<ParticipantId, SnapshotId>,
    known_reboots: DashMap<ParticipantId, RebootId>,
    tombstones: DashMap<SnapshotId, String>,
}

impl SnapshotManager {
    pub fn new(group_id: GroupId, batch_size: usize) -> Self {
        SnapshotManager {
            group_id,
            batch_size,
            sessions: DashMap::new(),
            by_follower: DashMap::new(),
            known_reboots: DashMap::new(),
            tombstones: DashMap::new(),
        }
    }

    /// Start a session for `follower` over the given point-in-time view.
    pub fn start(
        &self,
        follower: ParticipantId,
        reboot_id: RebootId,
        view: ShardSetView,
        spearhead_index: LogIndex,
        term: Term,
    ) -> Result<SnapshotManifest> {
        if let Some(current) = self.known_reboots.get(&follower).map(|r| *r) {
            if reboot_id < current {
                return Err(ReplicationError::StaleRebootId {
                    follower: follower.to_string(),
                    got: reboot_id.as_u64(),
                    current: current.as_u64(),
                });
            }
        }
        self.known_reboots.insert(follower.clone(), reboot_id);

        if let Some(existing_id) = self.by_follower.get(&follower).map(|e| e.clone()) {
            let superseded = self
                .sessions
                .get(&existing_id)
                .map(|s| s.follower_reboot() < reboot_id)
                .unwrap_or(true);
            if superseded {
                self.invalidate(&existing_id, "follower rebooted during transfer");
            } else {
                return Err(ReplicationError::SnapshotAlreadyOpen(follower.to_string()));
            }
        }

        let snapshot_id = SnapshotId::generate();
        let session = SnapshotSession::new(
            snapshot_id.clone(),
            self.group_id,
            follower.clone(),
            reboot_id,
            view,
            spearhead_index,
            term,
        );
        let manifest = session.manifest();
        log::info!(
            "SnapshotManager[{}]: session {} for {} at spearhead {} ({} documents)",
            self.group_id,
            snapshot_id,
            follower,
            spearhead_index,
            manifest.total_documents
        );
        self.sessions.insert(snapshot_id.clone(), session);
        self.by_follower.insert(follower, snapshot_id);
        Ok(manifest)
    }

    /// Produce the next batch, or `None` when the session is exhausted.
    pub fn next_batch(&self, snapshot_id: &SnapshotId) -> Result<Option<SnapshotBatch>> {
        if let Some(reason) = self.tombstones.get(snapshot_id) {
            return Err(ReplicationError::SnapshotInvalidated {
                snapshot_id: snapshot_id.to_string(),
                reason: reason.clone(),
            });
        }
        match self.sessions.get_mut(snapshot_id) {
            Some(mut session) => Ok(session.next_batch(self.batch_size)),
            None => Err(ReplicationError::SnapshotNotFound(snapshot_id.to_string())),
        }
    }

    pub fn status(&self, snapshot_id: &SnapshotId) -> Result<SnapshotStatus> {
        if let Some(reason) = self.tombstones.get(snapshot_id) {
            return Err(ReplicationError::SnapshotInvalidated {
                snapshot_id: snapshot_id.to_string(),
                reason: reason.clone(),
            });
        }
        self.sessions
            .get(snapshot_id)
            .map(|s| s.status())
            .ok_or_else(|| ReplicationError::SnapshotNotFound(snapshot_id.to_string()))
    }

    /// Close a session after the follower applied every batch. Returns the
    /// follower and the spearhead it resumes replay from.
    pub fn finish(&self, snapshot_id: &SnapshotId) -> Result<(ParticipantId, LogIndex)> {
        if let Some(reason) = self.tombstones.get(snapshot_id) {
            return Err(ReplicationError::SnapshotInvalidated {
                snapshot_id: snapshot_id.to_string(),
                reason: reason.clone(),
            });
        }
        match self.sessions.remove(snapshot_id) {
            Some((_, session)) => {
                self.by_follower.remove(session.follower());
                log::info!(
                    "SnapshotManager[{}]: session {} finished for {}",
                    self.group_id,
                    snapshot_id,
                    session.follower()
                );
                Ok((session.follower().clone(), session.spearhead_index()))
            }
            None => Err(ReplicationError::SnapshotNotFound(snapshot_id.to_string())),
        }
    }

    /// Release a session's resources without completing it.
    pub fn abort(&self, snapshot_id: &SnapshotId) -> Result<()> {
        if self.tombstones.remove(snapshot_id).is_some() {
            return Ok(());
        }
        match self.sessions.remove(snapshot_id) {
            Some((_, session)) => {
                self.by_follower.remove(session.follower());
                log::info!(
                    "SnapshotManager[{}]: session {} aborted",
                    self.group_id,
                    snapshot_id
                );
                Ok(())
            }
            None => Err(ReplicationError::SnapshotNotFound(snapshot_id.to_string())),
        }
    }

    /// React to a follower restart: any session negotiated with an earlier
    /// incarnation is void.
    pub fn observe_reboot(&self, follower: &ParticipantId, reboot_id: RebootId) {
        let newer = self
            .known_reboots
            .get(follower)
            .map(|current| reboot_id > *current)
            .unwrap_or(true);
        if !newer {
            return;
        }
        self.known_reboots.insert(follower.clone(), reboot_id);
        if let Some(session_id) = self.by_follower.get(follower).map(|e| e.clone()) {
            self.invalidate(&session_id, "follower rebooted during transfer");
        }
    }

    /// Lowest spearhead among open sessions; pins compaction.
    pub fn min_open_spearhead(&self) -> Option<LogIndex> {
        self.sessions.iter().map(|s| s.spearhead_index()).min()
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn invalidate(&self, snapshot_id: &SnapshotId, reason: &str) {
        if let Some((_, session)) = self.sessions.remove(snapshot_id) {
            self.by_follower.remove(session.follower());
            self.tombstones.insert(snapshot_id.clone(), reason.to_string());
            log::warn!(
                "SnapshotManager[{}]: session {} for {} invalidated: {}",
                self.group_id,
                snapshot_id,
                session.follower(),
                reason
            );
        }
    }
}
