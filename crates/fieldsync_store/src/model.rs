//! Persisted entity types.
//!
//! All rows are serialized to CBOR. Timestamps are milliseconds since
//! the Unix epoch, taken from the device clock at creation time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returns the current device-clock time in milliseconds.
#[must_use]
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The kind of a captured record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// A work-session start/end event.
    Session,
    /// A periodic location sample within a session.
    Sample,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Session => write!(f, "session"),
            RecordKind::Sample => write!(f, "sample"),
        }
    }
}

/// Sync status of a pending record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Waiting to be uploaded.
    Pending,
    /// Part of an in-flight batch.
    Syncing,
    /// Acknowledged by the remote store.
    Synced,
    /// Last upload attempt failed; awaiting retry.
    Error,
}

impl SyncStatus {
    /// Returns true if the record still belongs to the upload queue.
    ///
    /// `Syncing` records count as drainable: a crashed run leaves them
    /// behind and the next run re-reads the pending set fresh.
    #[must_use]
    pub fn is_drainable(&self) -> bool {
        !matches!(self, SyncStatus::Synced)
    }
}

/// Domain payload of a captured record.
///
/// A tagged union over the known record shapes plus an opaque bytes
/// fallback, so quarantine stays typed while tolerating shapes this
/// build does not know about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordPayload {
    /// A work session.
    Session {
        /// When the session started.
        started_at_ms: u64,
        /// When the session ended, if it has.
        ended_at_ms: Option<u64>,
        /// The worker who captured the session.
        worker_id: String,
        /// Site code the session was captured at, if known.
        site_code: Option<String>,
    },
    /// A location sample.
    Sample {
        /// When the sample was recorded.
        recorded_at_ms: u64,
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
        /// Horizontal accuracy in meters, if reported.
        accuracy_m: Option<f64>,
    },
    /// An unrecognized payload, preserved verbatim.
    Opaque(Vec<u8>),
}

/// One offline-created business event awaiting upload.
///
/// `client_id` and `captured_at_ms` are set once at creation and never
/// change; `client_id` is the idempotency key for the remote upsert.
/// Only the sync bookkeeping fields (and, after a remote-wins conflict,
/// the payload) mutate afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRecord {
    /// Client-generated UUIDv4, globally unique.
    pub client_id: Uuid,
    /// Record kind.
    pub kind: RecordKind,
    /// Owning session's client id (samples only).
    pub parent_client_id: Option<Uuid>,
    /// Domain fields.
    pub payload: RecordPayload,
    /// Device-clock creation timestamp, immutable.
    pub captured_at_ms: u64,
    /// Last local modification timestamp.
    pub updated_at_ms: u64,
    /// Current sync status.
    pub sync_status: SyncStatus,
    /// Number of upload attempts so far.
    pub sync_attempts: u32,
    /// Message from the last failed attempt.
    pub last_error: Option<String>,
    /// Server-assigned id, set once the remote store acknowledges.
    pub remote_id: Option<String>,
}

impl PendingRecord {
    /// Creates a session record.
    #[must_use]
    pub fn session(client_id: Uuid, captured_at_ms: u64, payload: RecordPayload) -> Self {
        Self {
            client_id,
            kind: RecordKind::Session,
            parent_client_id: None,
            payload,
            captured_at_ms,
            updated_at_ms: captured_at_ms,
            sync_status: SyncStatus::Pending,
            sync_attempts: 0,
            last_error: None,
            remote_id: None,
        }
    }

    /// Creates a sample record owned by the given session.
    #[must_use]
    pub fn sample(
        client_id: Uuid,
        parent_client_id: Uuid,
        captured_at_ms: u64,
        payload: RecordPayload,
    ) -> Self {
        Self {
            client_id,
            kind: RecordKind::Sample,
            parent_client_id: Some(parent_client_id),
            payload,
            captured_at_ms,
            updated_at_ms: captured_at_ms,
            sync_status: SyncStatus::Pending,
            sync_attempts: 0,
            last_error: None,
            remote_id: None,
        }
    }
}

/// Engine-wide sync state, one row per store.
///
/// Updated transactionally after every sync attempt; read on cold
/// start to rehydrate the externally observable status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// When the last sync run started.
    pub last_sync_attempt_ms: Option<u64>,
    /// When the last fully successful sync run finished.
    pub last_successful_sync_ms: Option<u64>,
    /// Failed runs since the last success.
    pub consecutive_failures: u32,
    /// Backoff delay the next trigger should honor, in seconds.
    pub current_backoff_secs: u64,
    /// Crash marker: true while a sync run is active.
    pub sync_in_progress: bool,
    /// Message from the last failed run.
    pub last_error: Option<String>,
    /// Drainable session records.
    pub pending_sessions: u64,
    /// Drainable sample records.
    pub pending_samples: u64,
}

/// Review status of a quarantined record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewStatus {
    /// Awaiting operator review.
    Pending,
    /// Operator resolved the underlying problem.
    Resolved,
    /// Operator discarded the record.
    Discarded,
}

/// A record moved out of the active queue after a non-retryable
/// validation failure.
///
/// The full serialized record is kept losslessly; quarantined rows are
/// never auto-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantinedRecord {
    /// Quarantine row id.
    pub id: Uuid,
    /// Kind of the original record.
    pub kind: RecordKind,
    /// Client id of the original record.
    pub original_id: Uuid,
    /// Full CBOR serialization of the original [`PendingRecord`].
    pub record_data: Vec<u8>,
    /// Error code from the remote rejection.
    pub error_code: String,
    /// Human-readable rejection message.
    pub error_message: String,
    /// When the record was quarantined.
    pub quarantined_at_ms: u64,
    /// Operator review status.
    pub review_status: ReviewStatus,
    /// Operator notes or discard reason.
    pub review_notes: Option<String>,
}

/// Severity of a sync log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal progress.
    Info,
    /// Unexpected but recoverable.
    Warn,
    /// Failure.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// One append-only sync log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    /// When the entry was written.
    pub timestamp_ms: u64,
    /// Severity.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
    /// Structured key/value context.
    pub metadata: Vec<(String, String)>,
}

/// Storage usage snapshot, one row per store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageMetrics {
    /// Capacity budget for the local store.
    pub total_capacity_bytes: u64,
    /// Total serialized bytes across all tables.
    pub used_bytes: u64,
    /// Bytes held by pending records.
    pub pending_bytes: u64,
    /// Bytes held by quarantined records.
    pub quarantine_bytes: u64,
    /// Bytes held by log entries.
    pub log_bytes: u64,
    /// Bytes held by singleton metadata rows.
    pub metadata_bytes: u64,
    /// When the snapshot was computed.
    pub last_calculated_ms: u64,
    /// Usage percentage that raises a warning.
    pub warning_threshold_pct: u8,
    /// Usage percentage that is critical.
    pub critical_threshold_pct: u8,
}

impl Default for StorageMetrics {
    fn default() -> Self {
        Self {
            total_capacity_bytes: 0,
            used_bytes: 0,
            pending_bytes: 0,
            quarantine_bytes: 0,
            log_bytes: 0,
            metadata_bytes: 0,
            last_calculated_ms: 0,
            warning_threshold_pct: 80,
            critical_threshold_pct: 95,
        }
    }
}

impl StorageMetrics {
    /// Used capacity as a percentage, saturating at 100.
    #[must_use]
    pub fn used_pct(&self) -> u8 {
        if self.total_capacity_bytes == 0 {
            return 0;
        }
        let pct = (self.used_bytes as f64 / self.total_capacity_bytes as f64) * 100.0;
        pct.min(100.0) as u8
    }
}
