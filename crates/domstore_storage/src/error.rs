//! Error types for persistence operations.

use crate::key::ObjectKey;
use thiserror::Error;

/// Result type for persistence operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during persistence operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A record's stored lock token no longer matches the one the
    /// caller loaded it with.
    #[error("concurrency conflict on {} record(s), first: {}", keys.len(), keys.first().map(ToString::to_string).unwrap_or_default())]
    Concurrency {
        /// Keys whose lock tokens were stale.
        keys: Vec<ObjectKey>,
    },

    /// An insert targeted a key that is already stored.
    #[error("duplicate key: {0}")]
    DuplicateKey(ObjectKey),

    /// The key belongs to a store other than this backend.
    #[error("key {key} does not belong to store {store}")]
    ForeignStore {
        /// The offending key.
        key: ObjectKey,
        /// The backend's store id.
        store: String,
    },

    /// The stored data is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The backend is unavailable.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Returns true if this is an optimistic-lock conflict.
    #[must_use]
    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}
