//! Node-level entry point: all shard-group replicas hosted by one node,
//! plus the shard-to-group routing table.
//!
//! The manager owns each replica and its apply task. Document operations
//! address shards; the manager resolves the owning group and delegates to
//! its replica.

use crate::config::ReplicationConfig;
use crate::control_plane::{ControlPlane, NoOpControlPlane};
use crate::durable::GroupDurableState;
use crate::error::{ReplicationError, Result};
use crate::group::{replica::WriteOutcome, worker, GroupReplica};
use crate::participants::LogStatusReport;
use dashmap::DashMap;
use plumedb_commons::{
    Document, DocumentKey, GroupId, IndexDefinition, IndexId, ParticipantId, RebootId, ShardId,
    ShardProperties,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

struct GroupHandle {
    replica: Arc<GroupReplica>,
    worker: JoinHandle<()>,
}

pub struct ReplicationManager {
    local_id: ParticipantId,
    reboot_id: RebootId,
    config: ReplicationConfig,
    control_plane: Arc<dyn ControlPlane>,
    groups: DashMap<GroupId, GroupHandle>,
    routes: DashMap<ShardId, GroupId>,
}

impl ReplicationManager {
    pub fn new(
        local_id: ParticipantId,
        reboot_id: RebootId,
        config: ReplicationConfig,
        control_plane: Arc<dyn ControlPlane>,
    ) -> Result<Self> {
        config.validate()?;
        log::info!(
            "ReplicationManager: starting as {} ({})",
            local_id,
            reboot_id
        );
        Ok(ReplicationManager {
            local_id,
            reboot_id,
            config,
            control_plane,
            groups: DashMap::new(),
            routes: DashMap::new(),
        })
    }

    /// Standalone node: quorum of one, no control plane.
    pub fn single_node(local_id: ParticipantId, reboot_id: RebootId) -> Self {
        Self::new(
            local_id,
            reboot_id,
            ReplicationConfig::for_single_node(),
            Arc::new(NoOpControlPlane),
        )
        .expect("single-node defaults are valid")
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn reboot_id(&self) -> RebootId {
        self.reboot_id
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    // -------- group lifecycle --------

    pub fn create_group(&self, group_id: GroupId) -> Result<Arc<GroupReplica>> {
        if self.groups.contains_key(&group_id) {
            return Err(ReplicationError::GroupAlreadyExists(group_id.to_string()));
        }
        let replica = GroupReplica::new(
            group_id,
            self.local_id.clone(),
            self.reboot_id,
            self.config.clone(),
            Arc::clone(&self.control_plane),
        );
        let handle = GroupHandle {
            replica: Arc::clone(&replica),
            worker: worker::spawn_apply_loop(Arc::clone(&replica)),
        };
        self.groups.insert(group_id, handle);
        log::info!("ReplicationManager: created {}", group_id);
        Ok(replica)
    }

    /// Rebuild a group from its durable state after a restart. Shard
    /// contents come back by replay once a leader drives the commit index.
    pub fn restore_group(&self, state: GroupDurableState) -> Result<Arc<GroupReplica>> {
        if self.groups.contains_key(&state.group_id) {
            return Err(ReplicationError::GroupAlreadyExists(state.group_id.to_string()));
        }
        let replica = GroupReplica::restore(
            state.group_id,
            self.local_id.clone(),
            self.reboot_id,
            self.config.clone(),
            Arc::clone(&self.control_plane),
            state.term,
            state.anchor,
            state.entries,
        )?;
        let handle = GroupHandle {
            replica: Arc::clone(&replica),
            worker: worker::spawn_apply_loop(Arc::clone(&replica)),
        };
        self.groups.insert(state.group_id, handle);
        log::info!("ReplicationManager: restored {}", state.group_id);
        Ok(replica)
    }

    pub fn group(&self, group_id: GroupId) -> Result<Arc<GroupReplica>> {
        self.groups
            .get(&group_id)
            .map(|h| Arc::clone(&h.replica))
            .ok_or_else(|| ReplicationError::GroupNotFound(group_id.to_string()))
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        self.groups.iter().map(|e| *e.key()).collect()
    }

    /// Stop a group's apply task and drop the replica. Routes pointing at
    /// the group are removed.
    pub async fn remove_group(&self, group_id: GroupId) -> Result<()> {
        let (_, handle) = self
            .groups
            .remove(&group_id)
            .ok_or_else(|| ReplicationError::GroupNotFound(group_id.to_string()))?;
        handle.replica.shutdown();
        let _ = handle.worker.await;
        self.routes.retain(|_, mapped| *mapped != group_id);
        log::info!("ReplicationManager: removed {}", group_id);
        Ok(())
    }

    pub async fn shutdown(&self) {
        let ids = self.group_ids();
        for group_id in ids {
            if let Some((_, handle)) = self.groups.remove(&group_id) {
                handle.replica.shutdown();
                let _ = handle.worker.await;
            }
        }
        self.routes.clear();
        log::info!("ReplicationManager: shut down");
    }

    // -------- shard routing --------

    pub fn map_shard(&self, shard: ShardId, group_id: GroupId) -> Result<()> {
        if !self.groups.contains_key(&group_id) {
            return Err(ReplicationError::GroupNotFound(group_id.to_string()));
        }
        if let Some(existing) = self.routes.get(&shard) {
            if *existing != group_id {
                return Err(ReplicationError::invalid_state(format!(
                    "shard {} is already mapped to {}",
                    shard, *existing
                )));
            }
            return Ok(());
        }
        self.routes.insert(shard, group_id);
        Ok(())
    }

    pub fn unmap_shard(&self, shard: &ShardId) {
        self.routes.remove(shard);
    }

    pub fn group_for_shard(&self, shard: &ShardId) -> Result<Arc<GroupReplica>> {
        let group_id = self
            .routes
            .get(shard)
            .map(|g| *g)
            .ok_or_else(|| ReplicationError::ShardNotMapped(shard.to_string()))?;
        self.group(group_id)
    }

    // -------- shard and document operations --------

    pub async fn create_shard(
        &self,
        shard: ShardId,
        group_id: GroupId,
        properties: ShardProperties,
    ) -> Result<()> {
        let replica = self.group(group_id)?;
        self.map_shard(shard.clone(), group_id)?;
        match replica.create_shard(shard.clone(), properties).await {
            Ok(_) => Ok(()),
            Err(error) => {
                self.unmap_shard(&shard);
                Err(error)
            }
        }
    }

    pub async fn drop_shard(&self, shard: &ShardId) -> Result<()> {
        let replica = self.group_for_shard(shard)?;
        replica.drop_shard(shard.clone()).await?;
        self.unmap_shard(shard);
        Ok(())
    }

    pub async fn modify_shard(&self, shard: &ShardId, properties: ShardProperties) -> Result<()> {
        let replica = self.group_for_shard(shard)?;
        replica.modify_shard(shard.clone(), properties).await?;
        Ok(())
    }

    pub async fn create_index(&self, shard: &ShardId, index: IndexDefinition) -> Result<()> {
        let replica = self.group_for_shard(shard)?;
        replica.create_index(shard.clone(), index).await?;
        Ok(())
    }

    pub async fn drop_index(&self, shard: &ShardId, index_id: IndexId) -> Result<()> {
        let replica = self.group_for_shard(shard)?;
        replica.drop_index(shard.clone(), index_id).await?;
        Ok(())
    }

    pub async fn insert(&self, shard: &ShardId, documents: Vec<Value>) -> Result<WriteOutcome> {
        self.group_for_shard(shard)?.insert(shard, documents).await
    }

    pub async fn update(&self, shard: &ShardId, documents: Vec<Value>) -> Result<WriteOutcome> {
        self.group_for_shard(shard)?.update(shard, documents).await
    }

    pub async fn replace(&self, shard: &ShardId, documents: Vec<Value>) -> Result<WriteOutcome> {
        self.group_for_shard(shard)?.replace(shard, documents).await
    }

    pub async fn remove(&self, shard: &ShardId, keys: Vec<DocumentKey>) -> Result<WriteOutcome> {
        self.group_for_shard(shard)?.remove(shard, keys).await
    }

    pub async fn truncate(&self, shard: &ShardId) -> Result<WriteOutcome> {
        self.group_for_shard(shard)?.truncate(shard).await
    }

    pub fn read(&self, shard: &ShardId, key: &DocumentKey) -> Result<Option<Arc<Document>>> {
        self.group_for_shard(shard)?.read(shard, key)
    }

    pub fn status_reports(&self) -> Vec<LogStatusReport> {
        self.groups
            .iter()
            .map(|e| e.value().replica.status_report())
            .collect()
    }
}

impl std::fmt::Debug for ReplicationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationManager")
            .field("local_id", &self.local_id)
            .field("groups", &self.groups.len())
            .field("routes", &self.routes.len())
            .finish()
    }
}
