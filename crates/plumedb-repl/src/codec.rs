//! Serialization helpers for bincode 2.x API compatibility.
//!
//! Log entries, snapshot batches and durable state exports all travel as
//! bincode-encoded bytes produced by these helpers.

use crate::error::ReplicationError;
use serde::{de::DeserializeOwned, Serialize};

/// Encode a value to bytes using bincode.
///
/// Uses the standard bincode 2.x configuration with variable int encoding.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ReplicationError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ReplicationError::Serialization(e.to_string()))
}

/// Decode a value from bytes using bincode.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ReplicationError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ReplicationError::Serialization(e.to_string()))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogEntry;
    use crate::operation::Operation;
    use plumedb_commons::{LogIndex, ShardId, ShardProperties, Term};

    #[test]
    fn test_log_entry_roundtrip() {
        let entry = LogEntry::new(
            LogIndex::new(7),
            Term::new(2),
            Operation::CreateShard {
                shard: ShardId::new("s1"),
                properties: ShardProperties::default(),
            },
        );
        let bytes = encode(&entry).unwrap();
        let back: LogEntry = decode(&bytes).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<LogEntry, _> = decode(&[0xff, 0x00, 0x13]);
        assert!(result.is_err());
    }
}
