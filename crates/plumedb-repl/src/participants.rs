//! Per-participant replication status and the effective write concern.
//!
//! The table is the single source for quorum decisions: the effective
//! write concern is recomputed from it on every transition rather than
//! kept in ad hoc counters, and the quorum commit index is a pure function
//! over the participants' durable log watermarks.

use crate::config::ReplicationConfig;
use chrono::{DateTime, Utc};
use plumedb_commons::{GroupId, LogIndex, ParticipantId, RebootId, Term};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantRole {
    Leader,
    Follower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantState {
    /// Fully caught up and serving; counted toward the quorum pool.
    ServiceOperational,
    /// Bootstrapping from a snapshot; excluded from the quorum pool.
    AcquiringSnapshot,
}

/// Replication status of one participant, as tracked by the group.
///
/// Invariant: `release_index <= applied_index <= commit_index <= synced_index`
/// does not hold in full generality (commit is a group decision, synced is a
/// local one), but `release_index <= applied_index` always does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantStatus {
    pub id: ParticipantId,
    pub reboot_id: RebootId,
    pub role: ParticipantRole,
    /// Highest index durably held in this participant's log. Basis for the
    /// quorum commit computation.
    pub synced_index: LogIndex,
    /// Highest index this participant knows to be committed.
    pub commit_index: LogIndex,
    /// Highest index this participant has applied to its shard state.
    pub applied_index: LogIndex,
    /// Highest index this participant has both applied and flushed, i.e. it
    /// no longer needs earlier entries to survive a restart.
    pub release_index: LogIndex,
    pub snapshot_available: bool,
    pub state: ParticipantState,
}

impl ParticipantStatus {
    fn new(
        id: ParticipantId,
        reboot_id: RebootId,
        role: ParticipantRole,
        state: ParticipantState,
        snapshot_available: bool,
    ) -> Self {
        ParticipantStatus {
            id,
            reboot_id,
            role,
            synced_index: LogIndex::ZERO,
            commit_index: LogIndex::ZERO,
            applied_index: LogIndex::ZERO,
            release_index: LogIndex::ZERO,
            snapshot_available,
            state,
        }
    }

    /// Whether this participant counts toward the commit quorum.
    pub fn is_quorum_eligible(&self) -> bool {
        self.state == ParticipantState::ServiceOperational && self.snapshot_available
    }
}

/// Point-in-time status of one replicated log, published to the control
/// plane on participant transitions and queryable on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogStatusReport {
    pub group_id: GroupId,
    pub term: Term,
    pub leader: Option<ParticipantId>,
    pub commit_index: LogIndex,
    pub last_log_index: LogIndex,
    pub effective_write_concern: usize,
    pub participants: Vec<ParticipantStatus>,
    pub generated_at: DateTime<Utc>,
}

/// The participant status table of one shard group.
#[derive(Debug)]
pub struct ParticipantTable {
    participants: BTreeMap<ParticipantId, ParticipantStatus>,
    replication_factor: usize,
    write_concern_floor: usize,
    count_leader_ack: bool,
}

impl ParticipantTable {
    pub fn new(replication_factor: usize, write_concern_floor: usize, count_leader_ack: bool) -> Self {
        ParticipantTable {
            participants: BTreeMap::new(),
            replication_factor,
            // A floor of zero would let commit be reported without any
            // durable acknowledgement.
            write_concern_floor: write_concern_floor.max(1),
            count_leader_ack,
        }
    }

    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self::new(
            config.replication_factor,
            config.write_concern_floor,
            config.count_leader_ack,
        )
    }

    /// Add a participant that holds the group's content from genesis (or
    /// already bootstrapped): operational and quorum-eligible immediately.
    pub fn add_participant(&mut self, id: ParticipantId, reboot_id: RebootId, role: ParticipantRole) {
        self.participants.insert(
            id.clone(),
            ParticipantStatus::new(id, reboot_id, role, ParticipantState::ServiceOperational, true),
        );
    }

    /// Add a participant that must bootstrap from a snapshot before it can
    /// join the quorum pool.
    pub fn add_syncing_participant(&mut self, id: ParticipantId, reboot_id: RebootId) {
        self.participants.insert(
            id.clone(),
            ParticipantStatus::new(
                id,
                reboot_id,
                ParticipantRole::Follower,
                ParticipantState::AcquiringSnapshot,
                false,
            ),
        );
    }

    pub fn remove_participant(&mut self, id: &ParticipantId) -> Option<ParticipantStatus> {
        self.participants.remove(id)
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&ParticipantStatus> {
        self.participants.get(id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Record the durable log watermark reported by a participant.
    /// Monotonic; stale reports are ignored.
    pub fn record_synced(&mut self, id: &ParticipantId, index: LogIndex) {
        if let Some(p) = self.participants.get_mut(id) {
            p.synced_index = p.synced_index.max(index);
        }
    }

    pub fn record_commit(&mut self, id: &ParticipantId, index: LogIndex) {
        if let Some(p) = self.participants.get_mut(id) {
            p.commit_index = p.commit_index.max(index);
        }
    }

    pub fn record_applied(&mut self, id: &ParticipantId, index: LogIndex) {
        if let Some(p) = self.participants.get_mut(id) {
            p.applied_index = p.applied_index.max(index);
        }
    }

    /// Record a release watermark; clamped to the applied index so the
    /// `release <= applied` invariant holds.
    pub fn record_release(&mut self, id: &ParticipantId, index: LogIndex) {
        if let Some(p) = self.participants.get_mut(id) {
            p.release_index = p.release_index.max(index.min(p.applied_index));
        }
    }

    pub fn set_state(&mut self, id: &ParticipantId, state: ParticipantState) {
        if let Some(p) = self.participants.get_mut(id) {
            p.state = state;
        }
    }

    pub fn set_snapshot_available(&mut self, id: &ParticipantId, available: bool) {
        if let Some(p) = self.participants.get_mut(id) {
            p.snapshot_available = available;
        }
    }

    pub fn set_role(&mut self, id: &ParticipantId, role: ParticipantRole) {
        if let Some(p) = self.participants.get_mut(id) {
            p.role = role;
        }
    }

    /// Record that a participant restarted. Its watermarks are kept (its
    /// log may well survive a restart); session invalidation is handled by
    /// the snapshot manager.
    pub fn set_reboot_id(&mut self, id: &ParticipantId, reboot_id: RebootId) {
        if let Some(p) = self.participants.get_mut(id) {
            p.reboot_id = p.reboot_id.max(reboot_id);
        }
    }

    /// `min(configured factor, quorum-eligible count)`, never below the
    /// configured floor. Recomputed on demand; callers reread it after
    /// every participant transition.
    pub fn effective_write_concern(&self) -> usize {
        let eligible = self
            .participants
            .values()
            .filter(|p| p.is_quorum_eligible())
            .count();
        self.replication_factor
            .min(eligible)
            .max(self.write_concern_floor)
    }

    /// Highest index durably acknowledged by at least the effective write
    /// concern of quorum-eligible participants. Zero when the quorum pool
    /// is too small: commit never advances below the floor.
    pub fn quorum_commit_index(&self) -> LogIndex {
        let required = self.effective_write_concern();
        let mut synced: Vec<u64> = self
            .participants
            .values()
            .filter(|p| p.is_quorum_eligible())
            .filter(|p| self.count_leader_ack || p.role != ParticipantRole::Leader)
            .map(|p| p.synced_index.as_u64())
            .collect();
        if synced.len() < required {
            return LogIndex::ZERO;
        }
        synced.sort_unstable_by(|a, b| b.cmp(a));
        LogIndex::new(synced[required - 1])
    }

    /// Lowest release index over the participants that recover by replay
    /// (those with a snapshot available). Participants still acquiring a
    /// snapshot are covered separately by their session's spearhead.
    pub fn min_release_index(&self) -> Option<LogIndex> {
        self.participants
            .values()
            .filter(|p| p.snapshot_available)
            .map(|p| p.release_index)
            .min()
    }

    pub fn status_report(
        &self,
        group_id: GroupId,
        term: Term,
        commit_index: LogIndex,
        last_log_index: LogIndex,
    ) -> LogStatusReport {
        let leader = self
            .participants
            .values()
            .find(|p| p.role == ParticipantRole::Leader)
            .map(|p| p.id.clone());
        LogStatusReport {
            group_id,
            term,
            leader,
            commit_index,
            last_log_index,
            effective_write_concern: self.effective_write_concern(),
            participants: self.participants.values().cloned().collect(),
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(name: &str) -> ParticipantId {
        ParticipantId::new(name)
    }

    fn table_with(factor: usize, names: &[&str]) -> ParticipantTable {
        let mut table = ParticipantTable::new(factor, 1, true);
        for (i, name) in names.iter().enumerate() {
            let role = if i == 0 {
                ParticipantRole::Leader
            } else {
                ParticipantRole::Follower
            };
            table.add_participant(participant(name), RebootId::new(1), role);
        }
        table
    }

    #[test]
    fn test_effective_write_concern_shrinks_to_eligible() {
        let mut table = table_with(4, &["p1", "p2", "p3"]);
        assert_eq!(table.effective_write_concern(), 3);

        // A fourth participant stuck acquiring its snapshot does not raise
        // the quorum requirement.
        table.add_syncing_participant(participant("p4"), RebootId::new(1));
        assert_eq!(table.effective_write_concern(), 3);

        // Once its snapshot completes it does.
        table.set_snapshot_available(&participant("p4"), true);
        table.set_state(&participant("p4"), ParticipantState::ServiceOperational);
        assert_eq!(table.effective_write_concern(), 4);
    }

    #[test]
    fn test_effective_write_concern_never_below_floor() {
        let mut table = ParticipantTable::new(3, 2, true);
        table.add_participant(participant("p1"), RebootId::new(1), ParticipantRole::Leader);
        assert_eq!(table.effective_write_concern(), 2);
        // And a single eligible participant cannot reach it.
        table.record_synced(&participant("p1"), LogIndex::new(10));
        assert_eq!(table.quorum_commit_index(), LogIndex::ZERO);
    }

    #[test]
    fn test_quorum_commit_index_takes_nth_highest() {
        let mut table = table_with(2, &["p1", "p2", "p3"]);
        table.record_synced(&participant("p1"), LogIndex::new(9));
        table.record_synced(&participant("p2"), LogIndex::new(5));
        table.record_synced(&participant("p3"), LogIndex::new(3));
        // Factor 2 over three participants: second-highest synced index.
        assert_eq!(table.quorum_commit_index(), LogIndex::new(5));

        table.record_synced(&participant("p3"), LogIndex::new(8));
        assert_eq!(table.quorum_commit_index(), LogIndex::new(8));
    }

    #[test]
    fn test_quorum_excludes_non_operational() {
        let mut table = table_with(2, &["p1", "p2"]);
        table.record_synced(&participant("p1"), LogIndex::new(7));
        table.record_synced(&participant("p2"), LogIndex::new(7));
        assert_eq!(table.quorum_commit_index(), LogIndex::new(7));

        table.set_state(&participant("p2"), ParticipantState::AcquiringSnapshot);
        // Only one eligible participant remains; with factor 2 and floor 1
        // the requirement shrinks to... the floor, so p1 alone commits.
        assert_eq!(table.effective_write_concern(), 1);
        assert_eq!(table.quorum_commit_index(), LogIndex::new(7));
    }

    #[test]
    fn test_leader_ack_policy() {
        let mut table = ParticipantTable::new(1, 1, false);
        table.add_participant(participant("p1"), RebootId::new(1), ParticipantRole::Leader);
        table.add_participant(participant("p2"), RebootId::new(1), ParticipantRole::Follower);
        table.record_synced(&participant("p1"), LogIndex::new(9));
        // The leader's ack does not count; commit follows the follower.
        assert_eq!(table.quorum_commit_index(), LogIndex::ZERO);
        table.record_synced(&participant("p2"), LogIndex::new(4));
        assert_eq!(table.quorum_commit_index(), LogIndex::new(4));
    }

    #[test]
    fn test_release_clamped_to_applied() {
        let mut table = table_with(2, &["p1"]);
        table.record_applied(&participant("p1"), LogIndex::new(5));
        table.record_release(&participant("p1"), LogIndex::new(9));
        let status = table.get(&participant("p1")).unwrap();
        assert_eq!(status.release_index, LogIndex::new(5));
        assert!(status.release_index <= status.applied_index);
    }

    #[test]
    fn test_min_release_skips_snapshotless_participants() {
        let mut table = table_with(2, &["p1", "p2"]);
        table.record_applied(&participant("p1"), LogIndex::new(8));
        table.record_release(&participant("p1"), LogIndex::new(8));
        table.record_applied(&participant("p2"), LogIndex::new(6));
        table.record_release(&participant("p2"), LogIndex::new(6));
        assert_eq!(table.min_release_index(), Some(LogIndex::new(6)));

        // A brand-new syncing participant pins nothing; its needs are
        // covered by its snapshot session's spearhead.
        table.add_syncing_participant(participant("p3"), RebootId::new(1));
        assert_eq!(table.min_release_index(), Some(LogIndex::new(6)));
    }

    #[test]
    fn test_status_report_names_leader() {
        let mut table = table_with(2, &["p1", "p2"]);
        table.record_synced(&participant("p1"), LogIndex::new(3));
        let report = table.status_report(
            GroupId::new(7),
            Term::new(2),
            LogIndex::new(3),
            LogIndex::new(4),
        );
        assert_eq!(report.leader, Some(participant("p1")));
        assert_eq!(report.participants.len(), 2);
        assert_eq!(report.effective_write_concern, 2);
    }
}
