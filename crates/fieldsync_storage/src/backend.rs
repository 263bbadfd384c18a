//! Journal backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store backing the FieldSync journal.
///
/// Backends never interpret the bytes they hold. Framing, checksums,
/// and encryption all live in the journal layer above.
///
/// # Invariants
///
/// - `append` returns the offset the data was written at
/// - `read_at` returns exactly the bytes previously written there
/// - after `flush` returns, appended data survives process termination
/// - implementations must be `Send + Sync`
pub trait JournalBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Fails if the range extends past the current size or on I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends bytes and returns the offset they were written at.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes pending writes to the OS.
    fn flush(&mut self) -> StorageResult<()>;

    /// Syncs data and metadata to durable storage.
    ///
    /// Stronger than `flush`: file metadata is durable too.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes (the next append offset).
    fn size(&self) -> StorageResult<u64>;

    /// Truncates the store to `new_size` bytes.
    ///
    /// Used to drop a torn frame from the journal tail after a crash,
    /// and to reset the journal during compaction.
    ///
    /// # Errors
    ///
    /// Fails if `new_size` exceeds the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
