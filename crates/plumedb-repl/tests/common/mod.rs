//! Shared helpers for the replication integration tests: in-process entry
//! shipping between replicas and small cluster builders.

#![allow(dead_code)]

use plumedb_commons::{GroupId, LogIndex, ParticipantId, RebootId, ShardId, ShardProperties, Term};
use plumedb_repl::{GroupReplica, NoOpControlPlane, ReplicationConfig, ReplicationManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn node_id(n: usize) -> ParticipantId {
    ParticipantId::new(format!("dbserver-{n}"))
}

pub fn shard(name: &str) -> ShardId {
    ShardId::new(name)
}

pub fn cluster_config(factor: usize) -> ReplicationConfig {
    ReplicationConfig {
        replication_factor: factor,
        commit_timeout_ms: 5_000,
        ..ReplicationConfig::default()
    }
}

pub fn manager_with(id: usize, config: ReplicationConfig) -> ReplicationManager {
    ReplicationManager::new(
        node_id(id),
        RebootId::new(1),
        config,
        Arc::new(NoOpControlPlane),
    )
    .unwrap()
}

/// A single-node manager with an operational leader for one group.
pub fn single_leader(group: u64) -> (ReplicationManager, Arc<GroupReplica>) {
    init_logging();
    let manager = ReplicationManager::single_node(node_id(1), RebootId::new(1));
    let replica = manager.create_group(GroupId::new(group)).unwrap();
    replica.become_leader(Term::new(1)).unwrap();
    (manager, replica)
}

/// One transport round: ship the leader's new entries to the follower,
/// acknowledge the follower's watermarks back, and let the follower learn
/// the commit index.
pub fn ship(leader: &GroupReplica, follower: &GroupReplica) {
    let from = follower.log().last_index().next();
    let entries = leader.entries_from(from);
    if !entries.is_empty() {
        let synced = follower.append_entries(entries).unwrap();
        leader.acknowledge(follower.local_id(), synced);
    }
    follower.set_commit_index(leader.commit_index());
    leader.acknowledge_applied(
        follower.local_id(),
        follower.applied_index(),
        follower.applied_index(),
    );
}

/// Keep shipping entries between the two replicas until `task` finishes.
/// Used to drive quorum writes that need follower acknowledgements.
pub async fn drive<T>(
    leader: &Arc<GroupReplica>,
    follower: &Arc<GroupReplica>,
    task: JoinHandle<T>,
) -> T {
    loop {
        ship(leader, follower);
        if task.is_finished() {
            ship(leader, follower);
            return task.await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Wait until the replica has applied at least `index`.
pub async fn wait_applied(replica: &GroupReplica, index: LogIndex) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while replica.applied_index() < index {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "replica stuck: applied {} waiting for {}",
            replica.applied_index(),
            index
        )
    });
}

/// Wait until the replica has applied everything it knows to be committed.
pub async fn wait_caught_up(replica: &GroupReplica) {
    let target = replica.commit_index();
    wait_applied(replica, target).await;
}

pub fn default_properties() -> ShardProperties {
    ShardProperties::default()
}
