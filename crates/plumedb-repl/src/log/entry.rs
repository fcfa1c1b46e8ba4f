//! A single replicated log entry.

use crate::operation::Operation;
use plumedb_commons::{LogIndex, Term};
use serde::{Deserialize, Serialize};

/// One ordered, immutable record in a shard group's log. Entries without a
/// payload are term markers: the first entry a new leader appends for its
/// term, carrying no operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: LogIndex,
    pub term: Term,
    pub payload: Option<Operation>,
}

impl LogEntry {
    pub fn new(index: LogIndex, term: Term, operation: Operation) -> Self {
        LogEntry {
            index,
            term,
            payload: Some(operation),
        }
    }

    pub fn term_marker(index: LogIndex, term: Term) -> Self {
        LogEntry {
            index,
            term,
            payload: None,
        }
    }

    pub fn is_term_marker(&self) -> bool {
        self.payload.is_none()
    }

    /// Short payload name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            Some(op) => op.kind(),
            None => "TermMarker",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;
    use plumedb_commons::ShardId;

    #[test]
    fn test_term_marker() {
        let marker = LogEntry::term_marker(LogIndex::new(5), Term::new(3));
        assert!(marker.is_term_marker());
        assert_eq!(marker.kind(), "TermMarker");

        let entry = LogEntry::new(
            LogIndex::new(6),
            Term::new(3),
            Operation::Truncate {
                shard: ShardId::new("s1"),
            },
        );
        assert!(!entry.is_term_marker());
        assert_eq!(entry.kind(), "Truncate");
    }
}
