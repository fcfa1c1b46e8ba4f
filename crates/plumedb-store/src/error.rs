//! Errors raised by shard storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur while mutating or reading shard contents.
///
/// The replication layer classifies some of these as tolerable during log
/// replay after a failover, so variants carry enough context to tell what
/// was missing or duplicated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Shard does not exist in this shard set
    #[error("Shard not found: {0}")]
    ShardNotFound(String),

    /// Shard already exists (CreateShard on a taken id)
    #[error("Shard already exists: {0}")]
    ShardAlreadyExists(String),

    /// Document key not present in the shard
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Unique constraint violation (primary key or unique index)
    #[error("Unique constraint violation: {0}")]
    UniqueConstraintViolation(String),

    /// Index id or name not present in the shard
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    /// Index id or name already taken
    #[error("Index already exists: {0}")]
    IndexAlreadyExists(String),

    /// Document body was not usable (e.g. not a JSON object)
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

impl StorageError {
    /// True for errors caused by a missing target (document or shard).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::ShardNotFound(_)
                | StorageError::DocumentNotFound(_)
                | StorageError::IndexNotFound(_)
        )
    }

    /// True for primary key or unique index conflicts.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StorageError::UniqueConstraintViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            StorageError::ShardNotFound("s1".into()).to_string(),
            "Shard not found: s1"
        );
        assert_eq!(
            StorageError::UniqueConstraintViolation("_key a".into()).to_string(),
            "Unique constraint violation: _key a"
        );
    }

    #[test]
    fn test_classification_helpers() {
        assert!(StorageError::DocumentNotFound("k".into()).is_not_found());
        assert!(StorageError::ShardNotFound("s".into()).is_not_found());
        assert!(!StorageError::DocumentNotFound("k".into()).is_unique_violation());
        assert!(StorageError::UniqueConstraintViolation("x".into()).is_unique_violation());
    }
}
