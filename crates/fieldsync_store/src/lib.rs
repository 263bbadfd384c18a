//! Durable, encrypted local store for offline-captured field records.
//!
//! Every mutation is committed through an append-only, CRC-framed,
//! optionally AES-256-GCM-encrypted journal before it is visible, so a
//! crash at any point leaves the store at a consistent earlier state.
//! On open the journal is replayed into typed in-memory tables; a torn
//! tail frame from a mid-write crash is detected and truncated.
//!
//! The crate exposes:
//!
//! - [`LocalStore`], the transactional store holding the pending-record
//!   queue, sync metadata, quarantine, sync log, and storage metrics
//! - [`SyncLogger`], durable logging mirrored to `tracing`
//! - [`StorageMonitor`], capacity thresholds and synced-record pruning
//! - [`QuarantineStore`], the operator review workflow

pub mod crypto;
pub mod error;
pub mod journal;
pub mod logger;
pub mod model;
pub mod monitor;
pub mod quarantine;
pub mod store;

pub use crypto::EncryptionKey;
pub use error::{StoreError, StoreResult};
pub use logger::SyncLogger;
pub use model::{
    now_ms, LogLevel, PendingRecord, QuarantinedRecord, RecordKind, RecordPayload, ReviewStatus,
    StorageMetrics, SyncLogEntry, SyncMetadata, SyncStatus,
};
pub use monitor::{StorageMonitor, StoragePressure};
pub use quarantine::QuarantineStore;
pub use store::{LocalStore, StoreOptions, StoreTxn, TableStats};
