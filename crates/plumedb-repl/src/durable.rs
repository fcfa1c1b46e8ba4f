//! Durable per-group state: what a node persists and reloads across a
//! restart. Shard contents are not part of it; they are reconstructed by
//! replaying the retained log tail from the compaction anchor.

use crate::codec;
use crate::compaction::CompactionAnchor;
use crate::error::Result;
use crate::group::GroupReplica;
use crate::log::LogEntry;
use plumedb_commons::{GroupId, Term};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDurableState {
    pub group_id: GroupId,
    pub term: Term,
    pub anchor: CompactionAnchor,
    pub entries: Vec<LogEntry>,
}

impl GroupDurableState {
    pub fn from_replica(replica: &GroupReplica) -> Self {
        let (term, anchor, entries) = replica.durable_parts();
        GroupDurableState {
            group_id: replica.group_id(),
            term,
            anchor,
            entries,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        codec::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        codec::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;
    use crate::state_machine::ShardDescriptor;
    use plumedb_commons::{LogIndex, ShardId, ShardProperties};

    #[test]
    fn test_round_trip_through_bytes() {
        let state = GroupDurableState {
            group_id: GroupId::new(3),
            term: Term::new(2),
            anchor: CompactionAnchor {
                index: LogIndex::new(10),
                term: Term::new(1),
                shards: vec![ShardDescriptor {
                    shard: ShardId::new("s1"),
                    properties: ShardProperties::default(),
                    indexes: vec![],
                }],
            },
            entries: vec![
                LogEntry::term_marker(LogIndex::new(11), Term::new(2)),
                LogEntry::new(
                    LogIndex::new(12),
                    Term::new(2),
                    Operation::Truncate { shard: ShardId::new("s1") },
                ),
            ],
        };
        let bytes = state.encode().unwrap();
        let decoded = GroupDurableState::decode(&bytes).unwrap();
        assert_eq!(decoded, state);
    }
}
