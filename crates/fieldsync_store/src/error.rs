//! Error types for the local store.

use thiserror::Error;
use uuid::Uuid;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the local store.
///
/// Callers treat any `StoreError` during a sync run as fatal for that
/// run but retryable on the next trigger.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying byte-store failure.
    #[error("storage error: {0}")]
    Storage(#[from] fieldsync_storage::StorageError),

    /// Row or frame serialization failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// Encryption or decryption failure.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// The journal contains a corrupt frame before the tail.
    #[error("journal corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the store directory lock.
    #[error("store directory is locked: {0}")]
    Locked(String),

    /// A record with this client id is already enqueued.
    #[error("duplicate record {0}")]
    DuplicateRecord(Uuid),

    /// No record with this id exists.
    #[error("record {0} not found")]
    NotFound(Uuid),

    /// The quarantined record already has a terminal review status.
    #[error("quarantined record {0} is already reviewed")]
    AlreadyReviewed(Uuid),

    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl StoreError {
    /// Creates a codec error from any displayable cause.
    pub fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec(err.to_string())
    }
}
