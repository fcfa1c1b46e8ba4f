//! Log compaction: discarding the prefix no live participant depends on.
//!
//! The cut point is the minimum release index over participants that
//! recover by replay, further clamped by the spearhead of any open
//! snapshot session (its follower resumes replay at spearhead + 1, so
//! entries from there on must survive). A participant that cannot keep up
//! simply delays compaction; it never causes entries it still needs to be
//! discarded.

use crate::state_machine::ShardDescriptor;
use plumedb_commons::{LogIndex, Term};
use serde::{Deserialize, Serialize};

/// Durable record of the last compaction: the position of the last
/// discarded entry plus the shard schema at that point, so the identity of
/// the group's shards stays derivable without replaying the discarded
/// prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CompactionAnchor {
    /// Index of the last discarded entry; replay resumes at `index + 1`.
    pub index: LogIndex,
    pub term: Term,
    pub shards: Vec<ShardDescriptor>,
}

/// Outcome of one compaction run.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionReport {
    pub discarded: u64,
    pub lowest_index_kept: LogIndex,
    pub anchor_index: LogIndex,
}

/// Lowest log index that must survive compaction.
///
/// `min_release` is the minimum release index over replay-recovering
/// participants (entries strictly below it are safe to discard);
/// `open_snapshot_floor` is the lowest spearhead among open snapshot
/// sessions, whose follower will need entries from spearhead + 1.
pub fn lowest_index_to_keep(
    min_release: Option<LogIndex>,
    open_snapshot_floor: Option<LogIndex>,
) -> LogIndex {
    let mut cut = min_release.unwrap_or(LogIndex::ZERO);
    if let Some(spearhead) = open_snapshot_floor {
        cut = cut.min(spearhead.next());
    }
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cut_follows_min_release() {
        assert_eq!(
            lowest_index_to_keep(Some(LogIndex::new(7)), None),
            LogIndex::new(7)
        );
        assert_eq!(lowest_index_to_keep(None, None), LogIndex::ZERO);
    }

    #[test]
    fn test_open_snapshot_pins_the_cut() {
        // Everyone released through 20, but a transfer is open at
        // spearhead 10: its follower resumes at 11, so keep from 11.
        assert_eq!(
            lowest_index_to_keep(Some(LogIndex::new(20)), Some(LogIndex::new(10))),
            LogIndex::new(11)
        );
        // A session ahead of the release floor changes nothing.
        assert_eq!(
            lowest_index_to_keep(Some(LogIndex::new(5)), Some(LogIndex::new(10))),
            LogIndex::new(5)
        );
    }

    #[test]
    fn test_anchor_default_means_replay_from_one() {
        let anchor = CompactionAnchor::default();
        assert_eq!(anchor.index, LogIndex::ZERO);
        assert_eq!(anchor.index.next(), LogIndex::new(1));
        assert!(anchor.shards.is_empty());
    }
}
