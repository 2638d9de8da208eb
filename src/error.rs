//! Error types surfaced by the store
//!
//! Every store operation resolves to a [`StoreResult`]. The store never retries
//! and never recovers silently; callers decide whether to ask the user again.

use std::time::Duration;

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by the schema manager, the connection handle and the
/// collection store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Opening the database failed (I/O fault, version conflict, quota)
    #[error("connection error: {0}")]
    Connection(String),

    /// Creating a collection during the upgrade step failed
    #[error("schema upgrade failed for collection '{collection}': {reason}")]
    SchemaUpgrade { collection: String, reason: String },

    /// A read or write transaction was aborted
    #[error("transaction on '{collection}' failed: {reason}")]
    Transaction { collection: String, reason: String },

    /// Lookup miss where strict semantics apply
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed record or bad argument
    #[error("validation error: {0}")]
    Validation(String),

    /// Strict insert hit an existing key
    #[error("key {key} already exists in '{collection}'")]
    KeyConflict { collection: String, key: String },

    /// The operation did not complete within the configured bound
    #[error("{operation} on '{collection}' timed out after {after:?}")]
    TimedOut {
        operation: &'static str,
        collection: String,
        after: Duration,
    },

    /// The operation was cancelled before it committed
    #[error("{operation} on '{collection}' was cancelled")]
    Cancelled {
        operation: &'static str,
        collection: String,
    },

    /// Stored JSON could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn transaction(collection: &str, err: impl std::fmt::Display) -> Self {
        StoreError::Transaction {
            collection: collection.to_string(),
            reason: err.to_string(),
        }
    }

    pub fn schema_upgrade(collection: &str, err: impl std::fmt::Display) -> Self {
        StoreError::SchemaUpgrade {
            collection: collection.to_string(),
            reason: err.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation(message.into())
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Connection(_) => "connection",
            StoreError::SchemaUpgrade { .. } => "schema_upgrade",
            StoreError::Transaction { .. } => "transaction",
            StoreError::NotFound(_) => "not_found",
            StoreError::Validation(_) => "validation",
            StoreError::KeyConflict { .. } => "key_conflict",
            StoreError::TimedOut { .. } => "timed_out",
            StoreError::Cancelled { .. } => "cancelled",
            StoreError::Serialization(_) => "serialization",
        }
    }
}

/// Whether a rusqlite error is a uniqueness/primary-key violation
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::transaction("Role", "disk I/O error");
        assert_eq!(
            err.to_string(),
            "transaction on 'Role' failed: disk I/O error"
        );

        let err = StoreError::KeyConflict {
            collection: "users".to_string(),
            key: "a".to_string(),
        };
        assert_eq!(err.to_string(), "key a already exists in 'users'");
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(StoreError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(StoreError::validation("bad").kind(), "validation");
        assert_eq!(
            StoreError::schema_upgrade("Role", "quota").kind(),
            "schema_upgrade"
        );
    }
}
