//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in a journal backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the store.
    #[error("read beyond end of store: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current store size.
        size: u64,
    },

    /// Truncation target exceeds the current size.
    #[error("cannot truncate to {target} bytes, store holds {size}")]
    TruncatePastEnd {
        /// The requested new size.
        target: u64,
        /// The current store size.
        size: u64,
    },

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}
