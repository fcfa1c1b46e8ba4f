//! The local replica of one shard group.
//!
//! A replica owns the group's log, state machine, participant table and
//! snapshot sessions. The write path runs on the leader: it resolves
//! client documents (key extraction, revision assignment), appends fully
//! resolved operations, and parks a waiter that the apply loop completes
//! once the transaction's Commit entry has been committed and applied
//! locally. Followers ingest entries under leader-assigned indexes and
//! learn the commit index separately.
//!
//! Lock discipline: `parking_lot` guards are never held across an await.

use crate::commit::IndexCoordinator;
use crate::compaction::{lowest_index_to_keep, CompactionAnchor, CompactionReport};
use crate::config::ReplicationConfig;
use crate::control_plane::ControlPlane;
use crate::error::{ReplicationError, Result};
use crate::log::{LogEntry, LogStore};
use crate::operation::Operation;
use crate::participants::{LogStatusReport, ParticipantRole, ParticipantState, ParticipantTable};
use crate::recovery::{RecoveryProcedure, RecoveryReport};
use crate::snapshot::{SnapshotBatch, SnapshotManager, SnapshotManifest, SnapshotStatus};
use crate::state_machine::GroupStateMachine;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use plumedb_commons::{
    Document, DocumentKey, GroupId, IndexDefinition, IndexId, LogIndex, ParticipantId, RebootId,
    Revision, ShardId, ShardProperties, SnapshotId, Term, TrxId,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Notify};

/// Leadership view of the local replica.
#[derive(Debug, Clone, PartialEq)]
pub struct Leadership {
    pub role: ParticipantRole,
    pub term: Term,
    pub leader: Option<ParticipantId>,
    /// A fresh leader is not operational until its recovery replay is done.
    pub operational: bool,
}

impl Default for Leadership {
    fn default() -> Self {
        Leadership {
            role: ParticipantRole::Follower,
            term: Term::ZERO,
            leader: None,
            operational: false,
        }
    }
}

/// What a successful write returns to the submitter.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub trx: Option<TrxId>,
    /// Index of the entry whose application made the write visible.
    pub commit_index: LogIndex,
    /// The documents as replicated: keys and revisions resolved.
    pub documents: Vec<Document>,
}

pub(crate) type WaiterResult = Result<()>;

pub struct GroupReplica {
    group_id: GroupId,
    local_id: ParticipantId,
    config: ReplicationConfig,
    log: Arc<LogStore>,
    machine: Mutex<GroupStateMachine>,
    participants: RwLock<ParticipantTable>,
    leadership: RwLock<Leadership>,
    pub(crate) commit: IndexCoordinator,
    pub(crate) applied: IndexCoordinator,
    pub(crate) waiters: DashMap<u64, oneshot::Sender<WaiterResult>>,
    snapshots: SnapshotManager,
    /// Set while installing a snapshot; the apply loop parks on `resume`.
    pub(crate) paused: AtomicBool,
    pub(crate) resume: Notify,
    pub(crate) shutdown: watch::Sender<bool>,
    control_plane: Arc<dyn ControlPlane>,
    trx_counter: AtomicU64,
    /// Hybrid clock for revision assignment: max(now_ms, previous + 1).
    revision_clock: AtomicU64,
}

impl GroupReplica {
    pub fn new(
        group_id: GroupId,
        local_id: ParticipantId,
        reboot_id: RebootId,
        config: ReplicationConfig,
        control_plane: Arc<dyn ControlPlane>,
    ) -> Arc<Self> {
        let mut participants = ParticipantTable::from_config(&config);
        participants.add_participant(local_id.clone(), reboot_id, ParticipantRole::Follower);
        let snapshots = SnapshotManager::new(group_id, config.snapshot_batch_size);
        let (shutdown, _) = watch::channel(false);
        Arc::new(GroupReplica {
            group_id,
            local_id,
            config,
            log: Arc::new(LogStore::new(group_id)),
            machine: Mutex::new(GroupStateMachine::new(group_id)),
            participants: RwLock::new(participants),
            leadership: RwLock::new(Leadership::default()),
            commit: IndexCoordinator::default(),
            applied: IndexCoordinator::default(),
            waiters: DashMap::new(),
            snapshots,
            paused: AtomicBool::new(false),
            resume: Notify::new(),
            shutdown,
            control_plane,
            trx_counter: AtomicU64::new(1),
            revision_clock: AtomicU64::new(0),
        })
    }

    /// Rebuild a replica from durable state: the compaction anchor plus the
    /// retained log tail. Shard contents are reconstructed by replay (the
    /// anchor carries the schema at the cut point), driven by the next
    /// `become_leader` or the commit index learned from the current leader.
    pub fn restore(
        group_id: GroupId,
        local_id: ParticipantId,
        reboot_id: RebootId,
        config: ReplicationConfig,
        control_plane: Arc<dyn ControlPlane>,
        term: Term,
        anchor: CompactionAnchor,
        entries: Vec<LogEntry>,
    ) -> Result<Arc<Self>> {
        let mut participants = ParticipantTable::from_config(&config);
        participants.add_participant(local_id.clone(), reboot_id, ParticipantRole::Follower);
        let snapshots = SnapshotManager::new(group_id, config.snapshot_batch_size);
        let (shutdown, _) = watch::channel(false);

        let mut machine = GroupStateMachine::new(group_id);
        for descriptor in &anchor.shards {
            machine.install_shard(descriptor)?;
        }
        machine.set_last_applied(anchor.index);
        let anchor_index = anchor.index;
        let log = Arc::new(LogStore::restore(group_id, anchor, entries));

        Ok(Arc::new(GroupReplica {
            group_id,
            local_id,
            config,
            log,
            machine: Mutex::new(machine),
            participants: RwLock::new(participants),
            leadership: RwLock::new(Leadership {
                term,
                ..Leadership::default()
            }),
            commit: IndexCoordinator::new(anchor_index),
            applied: IndexCoordinator::new(anchor_index),
            waiters: DashMap::new(),
            snapshots,
            paused: AtomicBool::new(false),
            resume: Notify::new(),
            shutdown,
            control_plane,
            trx_counter: AtomicU64::new(1),
            revision_clock: AtomicU64::new(0),
        }))
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn log(&self) -> &LogStore {
        &self.log
    }

    pub(crate) fn with_machine<R>(&self, f: impl FnOnce(&mut GroupStateMachine) -> R) -> R {
        f(&mut self.machine.lock())
    }

    pub fn leadership(&self) -> Leadership {
        self.leadership.read().clone()
    }

    pub fn is_leader(&self) -> bool {
        self.leadership.read().role == ParticipantRole::Leader
    }

    pub fn term(&self) -> Term {
        self.leadership.read().term
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit.get()
    }

    pub fn applied_index(&self) -> LogIndex {
        self.applied.get()
    }

    // -------- membership --------

    /// Add a follower that already holds the group's content (genesis
    /// member): quorum-eligible immediately.
    pub fn add_follower(&self, id: ParticipantId, reboot_id: RebootId) {
        self.participants
            .write()
            .add_participant(id, reboot_id, ParticipantRole::Follower);
        self.publish_status();
    }

    /// Add a follower that must bootstrap via snapshot transfer before it
    /// can join the quorum pool.
    pub fn add_syncing_follower(&self, id: ParticipantId, reboot_id: RebootId) {
        self.participants.write().add_syncing_participant(id, reboot_id);
        self.publish_status();
    }

    pub fn remove_participant(&self, id: &ParticipantId) {
        self.participants.write().remove_participant(id);
        self.recompute_commit();
        self.publish_status();
    }

    /// A participant restarted with a new incarnation: its open snapshot
    /// session (if any) is void.
    pub fn observe_reboot(&self, id: &ParticipantId, reboot_id: RebootId) {
        self.participants.write().set_reboot_id(id, reboot_id);
        self.snapshots.observe_reboot(id, reboot_id);
    }

    // -------- leadership transitions --------

    /// Take over leadership for `term`: append the term marker, replay the
    /// committed tail in recovery mode, void dangling transactions, then
    /// start serving writes. An intolerable replay error aborts the
    /// takeover and leaves the replica non-operational.
    pub fn become_leader(&self, term: Term) -> Result<RecoveryReport> {
        {
            let mut leadership = self.leadership.write();
            leadership.role = ParticipantRole::Leader;
            leadership.term = leadership.term.max(term);
            leadership.leader = Some(self.local_id.clone());
            leadership.operational = false;
        }
        {
            let mut participants = self.participants.write();
            participants.set_role(&self.local_id, ParticipantRole::Leader);
        }
        log::info!(
            "Replica[{}]: {} taking leadership for term {}",
            self.group_id,
            self.local_id,
            term
        );

        self.log.append(term, None);
        self.note_local_synced();

        let report = {
            let mut machine = self.machine.lock();
            let report = RecoveryProcedure::run(&self.log, &mut machine, self.commit.get(), term);
            if let Ok(ref report) = report {
                self.applied.advance_to(report.end_index);
                let mut participants = self.participants.write();
                participants.record_applied(&self.local_id, report.end_index);
                participants.record_release(&self.local_id, report.end_index);
            }
            report
        }?;

        self.log.append(term, Some(Operation::AbortAllOngoingTrx));
        self.note_local_synced();
        self.leadership.write().operational = true;
        self.publish_status();
        Ok(report)
    }

    /// Step down (or acknowledge another participant's leadership).
    /// Pending submit waiters are failed with `NotLeader`.
    pub async fn become_follower(&self, term: Term, leader: Option<ParticipantId>) {
        let resigned_term = {
            let mut leadership = self.leadership.write();
            let was_leader = leadership.role == ParticipantRole::Leader;
            let old_term = leadership.term;
            leadership.role = ParticipantRole::Follower;
            leadership.term = leadership.term.max(term);
            leadership.leader = leader.clone();
            leadership.operational = true;
            was_leader.then_some(old_term)
        };
        {
            let mut participants = self.participants.write();
            participants.set_role(&self.local_id, ParticipantRole::Follower);
            if let Some(leader) = &leader {
                participants.set_role(leader, ParticipantRole::Leader);
            }
        }
        if let Some(old_term) = resigned_term {
            log::info!(
                "Replica[{}]: {} resigning leadership of term {}",
                self.group_id,
                self.local_id,
                old_term
            );
            self.fail_waiters(|| {
                ReplicationError::not_leader(
                    self.group_id.to_string(),
                    leader.as_ref().map(|l| l.to_string()),
                )
            });
            self.control_plane
                .leadership_resigned(self.group_id, old_term)
                .await;
        }
        self.publish_status();
    }

    // -------- leader write path --------

    pub async fn insert(&self, shard: &ShardId, documents: Vec<Value>) -> Result<WriteOutcome> {
        let resolved = documents
            .into_iter()
            .map(|value| self.resolve_document(&value, KeyPolicy::MintIfAbsent))
            .collect::<Result<Vec<_>>>()?;
        self.write_documents(shard, resolved, DocumentWrite::Insert).await
    }

    /// Merge patches into existing documents. Each value must carry `_key`.
    pub async fn update(&self, shard: &ShardId, documents: Vec<Value>) -> Result<WriteOutcome> {
        let resolved = documents
            .into_iter()
            .map(|value| self.resolve_document(&value, KeyPolicy::Required))
            .collect::<Result<Vec<_>>>()?;
        self.write_documents(shard, resolved, DocumentWrite::Update).await
    }

    pub async fn replace(&self, shard: &ShardId, documents: Vec<Value>) -> Result<WriteOutcome> {
        let resolved = documents
            .into_iter()
            .map(|value| self.resolve_document(&value, KeyPolicy::Required))
            .collect::<Result<Vec<_>>>()?;
        self.write_documents(shard, resolved, DocumentWrite::Replace).await
    }

    pub async fn remove(&self, shard: &ShardId, keys: Vec<DocumentKey>) -> Result<WriteOutcome> {
        if keys.is_empty() {
            return Err(ReplicationError::invalid_state("empty remove batch"));
        }
        self.ensure_operational_leader()?;
        let trx = self.next_trx();
        let mut operations = Vec::new();
        let chunk = self.config.intermediate_commit_count;
        let total = keys.len().div_ceil(chunk);
        for (i, batch) in keys.chunks(chunk).enumerate() {
            operations.push(Operation::Remove {
                shard: shard.clone(),
                trx,
                keys: batch.to_vec(),
            });
            if i + 1 < total {
                operations.push(Operation::IntermediateCommit { trx });
            }
        }
        self.submit_transaction(trx, operations, Vec::new()).await
    }

    /// Clear a shard. Above the configured threshold this replicates a
    /// single Truncate entry; below it, Remove batches under a normal
    /// transaction (cheaper to re-merge in the log storage tier).
    pub async fn truncate(&self, shard: &ShardId) -> Result<WriteOutcome> {
        let term = self.ensure_operational_leader()?;
        let keys: Vec<DocumentKey> = self.with_machine(|m| {
            m.shards()
                .shard(shard)
                .map(|s| s.document_keys())
        })?;
        if keys.len() > self.config.truncate_threshold {
            let index = self.append_and_wait(term, Operation::Truncate { shard: shard.clone() }).await?;
            return Ok(WriteOutcome {
                trx: None,
                commit_index: index,
                documents: Vec::new(),
            });
        }
        if keys.is_empty() {
            // Nothing to clear; still replicate the visibility boundary.
            let trx = self.next_trx();
            return self.submit_transaction(trx, Vec::new(), Vec::new()).await;
        }
        self.remove(shard, keys).await
    }

    pub async fn create_shard(&self, shard: ShardId, properties: ShardProperties) -> Result<LogIndex> {
        let term = self.ensure_operational_leader()?;
        self.append_and_wait(term, Operation::CreateShard { shard, properties }).await
    }

    pub async fn drop_shard(&self, shard: ShardId) -> Result<LogIndex> {
        let term = self.ensure_operational_leader()?;
        self.append_and_wait(term, Operation::DropShard { shard }).await
    }

    pub async fn modify_shard(&self, shard: ShardId, properties: ShardProperties) -> Result<LogIndex> {
        let term = self.ensure_operational_leader()?;
        self.append_and_wait(term, Operation::ModifyShard { shard, properties }).await
    }

    pub async fn create_index(&self, shard: ShardId, index: IndexDefinition) -> Result<LogIndex> {
        let term = self.ensure_operational_leader()?;
        self.append_and_wait(term, Operation::CreateIndex { shard, index }).await
    }

    pub async fn drop_index(&self, shard: ShardId, index_id: IndexId) -> Result<LogIndex> {
        let term = self.ensure_operational_leader()?;
        self.append_and_wait(term, Operation::DropIndex { shard, index_id }).await
    }

    async fn write_documents(
        &self,
        shard: &ShardId,
        documents: Vec<Document>,
        write: DocumentWrite,
    ) -> Result<WriteOutcome> {
        if documents.is_empty() {
            return Err(ReplicationError::invalid_state("empty write batch"));
        }
        self.ensure_operational_leader()?;
        let trx = self.next_trx();
        let mut operations = Vec::new();
        let chunk = self.config.intermediate_commit_count;
        let total = documents.len().div_ceil(chunk);
        for (i, batch) in documents.chunks(chunk).enumerate() {
            operations.push(write.operation(shard.clone(), trx, batch.to_vec()));
            if i + 1 < total {
                operations.push(Operation::IntermediateCommit { trx });
            }
        }
        self.submit_transaction(trx, operations, documents).await
    }

    /// Append a transaction's entries plus its Commit, then wait for the
    /// Commit entry to be committed by quorum and applied locally. A
    /// storage failure recorded against the transaction surfaces here.
    async fn submit_transaction(
        &self,
        trx: TrxId,
        operations: Vec<Operation>,
        documents: Vec<Document>,
    ) -> Result<WriteOutcome> {
        let term = self.ensure_operational_leader()?;
        for operation in operations {
            self.log.append(term, Some(operation));
        }
        let commit_index = self.log.append(term, Some(Operation::Commit { trx }));
        let (sender, receiver) = oneshot::channel();
        self.waiters.insert(commit_index.as_u64(), sender);
        self.note_local_synced();
        self.await_waiter(receiver, commit_index).await?;
        Ok(WriteOutcome {
            trx: Some(trx),
            commit_index,
            documents,
        })
    }

    async fn append_and_wait(&self, term: Term, operation: Operation) -> Result<LogIndex> {
        let index = self.log.append(term, Some(operation));
        let (sender, receiver) = oneshot::channel();
        self.waiters.insert(index.as_u64(), sender);
        self.note_local_synced();
        self.await_waiter(receiver, index).await?;
        Ok(index)
    }

    async fn await_waiter(
        &self,
        receiver: oneshot::Receiver<WaiterResult>,
        index: LogIndex,
    ) -> Result<()> {
        match tokio::time::timeout(self.config.commit_timeout(), receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ReplicationError::Shutdown),
            Err(_) => {
                self.waiters.remove(&index.as_u64());
                let required = self.participants.read().effective_write_concern();
                Err(ReplicationError::WriteConcernNotReached {
                    group: self.group_id.to_string(),
                    required,
                    commit_index: self.commit.get(),
                })
            }
        }
    }

    // -------- replication plumbing --------

    /// Follower ingest: append entries under their leader-assigned indexes.
    /// Returns the durable watermark to acknowledge back to the leader.
    pub fn append_entries(&self, entries: Vec<LogEntry>) -> Result<LogIndex> {
        for entry in entries {
            self.log.append_entry(entry)?;
        }
        Ok(self.log.last_index())
    }

    /// Entries from `from` onward, for shipping to a follower.
    pub fn entries_from(&self, from: LogIndex) -> Vec<LogEntry> {
        self.log.entries_from(from)
    }

    /// Leader side of an acknowledgement: a follower reports its durable
    /// log watermark. Recomputes the quorum commit index.
    pub fn acknowledge(&self, follower: &ParticipantId, synced_index: LogIndex) {
        self.participants.write().record_synced(follower, synced_index);
        self.recompute_commit();
    }

    /// A follower reports its applied and release watermarks.
    pub fn acknowledge_applied(
        &self,
        follower: &ParticipantId,
        applied_index: LogIndex,
        release_index: LogIndex,
    ) {
        let mut participants = self.participants.write();
        participants.record_applied(follower, applied_index);
        participants.record_release(follower, release_index);
    }

    /// Follower side: adopt the commit index learned from the leader.
    pub fn set_commit_index(&self, index: LogIndex) {
        if self.commit.advance_to(index) {
            self.participants.write().record_commit(&self.local_id, index);
        }
    }

    fn note_local_synced(&self) {
        let last = self.log.last_index();
        self.participants.write().record_synced(&self.local_id, last);
        self.recompute_commit();
    }

    fn recompute_commit(&self) {
        let quorum = self.participants.read().quorum_commit_index();
        if self.commit.advance_to(quorum) {
            self.participants.write().record_commit(&self.local_id, quorum);
            log::debug!("Replica[{}]: commit index now {}", self.group_id, quorum);
        }
    }

    // -------- reads and status --------

    /// Read against locally applied state. Serves on leader and followers;
    /// visibility trails the commit index by local apply progress.
    pub fn read(&self, shard: &ShardId, key: &DocumentKey) -> Result<Option<Arc<Document>>> {
        self.with_machine(|m| m.read(shard, key))
    }

    pub fn document_count(&self, shard: &ShardId) -> Result<usize> {
        self.with_machine(|m| m.shard_doc_count(shard))
    }

    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.with_machine(|m| m.shards().shard_ids())
    }

    pub fn open_transactions(&self) -> usize {
        self.with_machine(|m| m.open_transactions())
    }

    pub fn status_report(&self) -> LogStatusReport {
        let leadership = self.leadership.read().clone();
        self.participants.read().status_report(
            self.group_id,
            leadership.term,
            self.commit.get(),
            self.log.last_index(),
        )
    }

    pub fn effective_write_concern(&self) -> usize {
        self.participants.read().effective_write_concern()
    }

    fn publish_status(&self) {
        self.control_plane.publish_status(self.status_report());
    }

    // -------- snapshot transfer --------

    /// Leader side: open a snapshot session for a bootstrapping follower
    /// over a point-in-time view at the current applied index.
    pub fn start_snapshot(
        &self,
        follower: ParticipantId,
        reboot_id: RebootId,
    ) -> Result<SnapshotManifest> {
        let term = self.ensure_operational_leader()?;
        {
            let mut participants = self.participants.write();
            if !participants.contains(&follower) {
                participants.add_syncing_participant(follower.clone(), reboot_id);
            } else {
                participants.set_reboot_id(&follower, reboot_id);
                participants.set_state(&follower, ParticipantState::AcquiringSnapshot);
                participants.set_snapshot_available(&follower, false);
            }
        }
        // Spearhead and view must come from the same lock acquisition, or a
        // concurrent apply slips an entry into the view past the manifest's
        // spearhead.
        let (spearhead, view) = self.with_machine(|m| (m.last_applied(), m.view()));
        let manifest = self.snapshots.start(follower, reboot_id, view, spearhead, term)?;
        self.publish_status();
        Ok(manifest)
    }

    pub fn snapshot_batch(&self, snapshot_id: &SnapshotId) -> Result<Option<SnapshotBatch>> {
        self.snapshots.next_batch(snapshot_id)
    }

    pub fn snapshot_status(&self, snapshot_id: &SnapshotId) -> Result<SnapshotStatus> {
        self.snapshots.status(snapshot_id)
    }

    /// Leader side: the follower confirmed it applied every batch. It joins
    /// the quorum pool and resumes log replay at spearhead + 1.
    pub fn finish_snapshot(&self, snapshot_id: &SnapshotId) -> Result<()> {
        let (follower, spearhead) = self.snapshots.finish(snapshot_id)?;
        {
            let mut participants = self.participants.write();
            participants.set_snapshot_available(&follower, true);
            participants.set_state(&follower, ParticipantState::ServiceOperational);
            participants.record_synced(&follower, spearhead);
            participants.record_applied(&follower, spearhead);
            participants.record_release(&follower, spearhead);
        }
        self.recompute_commit();
        self.publish_status();
        Ok(())
    }

    pub fn abort_snapshot(&self, snapshot_id: &SnapshotId) -> Result<()> {
        self.snapshots.abort(snapshot_id)
    }

    /// Follower side: begin installing a snapshot. Pauses the apply loop
    /// and replaces local shards with the manifest's schema.
    pub fn install_snapshot_begin(&self, manifest: &SnapshotManifest) -> Result<()> {
        self.paused.store(true, Ordering::Release);
        self.with_machine(|m| {
            for shard in m.shards().shard_ids() {
                if !manifest.shards.iter().any(|d| d.shard == shard) {
                    m.shards_mut().drop_shard(&shard)?;
                }
            }
            for descriptor in &manifest.shards {
                m.install_shard(descriptor)?;
            }
            Ok::<_, ReplicationError>(())
        })?;
        log::info!(
            "Replica[{}]: installing snapshot {} ({} shards, spearhead {})",
            self.group_id,
            manifest.snapshot_id,
            manifest.shards.len(),
            manifest.spearhead_index
        );
        Ok(())
    }

    /// Follower side: install one batch with overwrite semantics.
    pub fn install_snapshot_batch(&self, batch: SnapshotBatch) -> Result<()> {
        self.with_machine(|m| m.install_documents(&batch.shard, batch.documents))
    }

    /// Follower side: all batches installed. Replay resumes at
    /// spearhead + 1; the apply loop wakes up.
    pub fn install_snapshot_finish(&self, manifest: &SnapshotManifest) -> Result<()> {
        self.with_machine(|m| m.set_last_applied(manifest.spearhead_index));
        // Everything at or below the spearhead is covered by the snapshot;
        // replay (and the local log) restarts right after it.
        self.log.reset_to_anchor(CompactionAnchor {
            index: manifest.spearhead_index,
            term: manifest.term,
            shards: manifest.shards.clone(),
        });
        self.applied.advance_to(manifest.spearhead_index);
        self.commit.advance_to(manifest.spearhead_index);
        {
            let mut leadership = self.leadership.write();
            leadership.term = leadership.term.max(manifest.term);
        }
        self.paused.store(false, Ordering::Release);
        self.resume.notify_waiters();
        Ok(())
    }

    // -------- compaction --------

    /// Discard the log prefix no live participant depends on. The cut is
    /// the minimum release index over replay-recovering participants,
    /// clamped by the spearhead of any open snapshot session.
    pub fn compact(&self) -> CompactionReport {
        let min_release = self.participants.read().min_release_index();
        let snapshot_floor = self.snapshots.min_open_spearhead();
        let cut = lowest_index_to_keep(min_release, snapshot_floor);
        let schema = self.with_machine(|m| m.schema_descriptors());
        let discarded = self.log.compact(cut, schema);
        let anchor = self.log.anchor();
        CompactionReport {
            discarded,
            lowest_index_kept: self.log.first_index(),
            anchor_index: anchor.index,
        }
    }

    /// Durable state to carry across a restart: term, anchor and the
    /// retained log tail.
    pub fn durable_parts(&self) -> (Term, CompactionAnchor, Vec<LogEntry>) {
        (
            self.term(),
            self.log.anchor(),
            self.log.entries_from(LogIndex::new(1)),
        )
    }

    // -------- lifecycle --------

    /// Stop the apply loop and fail pending submitters.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.fail_waiters(|| ReplicationError::Shutdown);
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    fn fail_waiters(&self, error: impl Fn() -> ReplicationError) {
        let indexes: Vec<u64> = self.waiters.iter().map(|e| *e.key()).collect();
        for index in indexes {
            if let Some((_, sender)) = self.waiters.remove(&index) {
                let _ = sender.send(Err(error()));
            }
        }
    }

    /// Record local apply progress (called by the apply loop).
    pub(crate) fn note_local_applied(&self, index: LogIndex) {
        self.applied.advance_to(index);
        let mut participants = self.participants.write();
        participants.record_applied(&self.local_id, index);
        // In-memory storage: applied entries are immediately releasable.
        participants.record_release(&self.local_id, index);
    }

    fn ensure_operational_leader(&self) -> Result<Term> {
        let leadership = self.leadership.read();
        if leadership.role != ParticipantRole::Leader {
            return Err(ReplicationError::not_leader(
                self.group_id.to_string(),
                leadership.leader.as_ref().map(|l| l.to_string()),
            ));
        }
        if !leadership.operational {
            return Err(ReplicationError::invalid_state(
                "leader recovery still in progress",
            ));
        }
        Ok(leadership.term)
    }

    fn next_trx(&self) -> TrxId {
        TrxId::new(self.trx_counter.fetch_add(1, Ordering::Relaxed))
    }

    fn next_revision(&self) -> Revision {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        loop {
            let prev = self.revision_clock.load(Ordering::Acquire);
            let next = now.max(prev + 1);
            if self
                .revision_clock
                .compare_exchange(prev, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Revision::new(next);
            }
        }
    }

    fn resolve_document(&self, value: &Value, policy: KeyPolicy) -> Result<Document> {
        let key = match value.get("_key").and_then(|v| v.as_str()) {
            Some(key) => DocumentKey::new(key),
            None => match policy {
                KeyPolicy::MintIfAbsent => DocumentKey::new(self.next_revision().to_string()),
                KeyPolicy::Required => {
                    return Err(plumedb_store::StorageError::InvalidDocument(
                        "missing _key attribute".to_string(),
                    )
                    .into())
                }
            },
        };
        let revision = self.next_revision();
        Document::from_json(key, revision, value).map_err(|_| {
            plumedb_store::StorageError::InvalidDocument(
                "document body must be a JSON object".to_string(),
            )
            .into()
        })
    }
}

impl std::fmt::Debug for GroupReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupReplica")
            .field("group_id", &self.group_id)
            .field("local_id", &self.local_id)
            .field("commit", &self.commit.get())
            .field("applied", &self.applied.get())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum KeyPolicy {
    MintIfAbsent,
    Required,
}

#[derive(Debug, Clone, Copy)]
enum DocumentWrite {
    Insert,
    Update,
    Replace,
}

impl DocumentWrite {
    fn operation(self, shard: ShardId, trx: TrxId, docs: Vec<Document>) -> Operation {
        match self {
            DocumentWrite::Insert => Operation::Insert { shard, trx, docs },
            DocumentWrite::Update => Operation::Update { shard, trx, docs },
            DocumentWrite::Replace => Operation::Replace { shard, trx, docs },
        }
    }
}
