//! Batch upsert request and response messages.
//!
//! One request carries an ordered batch of records of a single kind.
//! The server processes records in request order and returns exactly
//! one outcome per record, in the same order. Upserts are idempotent
//! on `client_id`: resubmitting an already-applied record yields
//! `Unchanged`.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Record kind on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireKind {
    /// A work session.
    Session,
    /// A location sample.
    Sample,
}

/// One record in a batch upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpsert {
    /// Client-generated idempotency key.
    pub client_id: Uuid,
    /// Server id of the owning session. Required for samples; `None`
    /// for sessions.
    pub parent_remote_id: Option<String>,
    /// Domain fields, CBOR-encoded. Opaque to the transport.
    pub payload: Vec<u8>,
    /// Device-clock creation timestamp.
    pub captured_at_ms: u64,
    /// Last local modification timestamp, used for conflict checks.
    pub updated_at_ms: u64,
    /// When true the server applies this record even if its copy is
    /// newer. Set on conflict resubmits after local-wins resolution.
    pub force: bool,
}

/// A batch of records of one kind, ordered by capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchUpsertRequest {
    /// Protocol version of the sender.
    pub protocol_version: u16,
    /// Kind of every record in the batch.
    pub kind: WireKind,
    /// Records in capture order.
    pub records: Vec<RecordUpsert>,
}

impl BatchUpsertRequest {
    /// Creates a request at the current protocol version.
    #[must_use]
    pub fn new(kind: WireKind, records: Vec<RecordUpsert>) -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            kind,
            records,
        }
    }

    /// Checks that the sender speaks this build's protocol version.
    ///
    /// Servers call this after decoding, before touching the records.
    pub fn ensure_supported(&self) -> ProtocolResult<()> {
        if self.protocol_version == crate::PROTOCOL_VERSION {
            Ok(())
        } else {
            Err(ProtocolError::UnsupportedVersion {
                got: self.protocol_version,
                supported: crate::PROTOCOL_VERSION,
            })
        }
    }
}

/// Per-record outcomes, one per request record, in request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchUpsertResponse {
    /// Outcome for each record.
    pub outcomes: Vec<UpsertOutcome>,
}

/// The server's verdict on one upserted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// The record was written.
    Applied {
        /// Idempotency key echoed back.
        client_id: Uuid,
        /// Server-assigned id.
        remote_id: String,
    },
    /// The record was already applied by an earlier request.
    Unchanged {
        /// Idempotency key echoed back.
        client_id: Uuid,
        /// Server-assigned id.
        remote_id: String,
    },
    /// The server holds a newer copy and did not apply the record.
    Conflict {
        /// Idempotency key echoed back.
        client_id: Uuid,
        /// The server's current copy.
        remote: RemoteRecord,
    },
    /// The record failed validation and will never be accepted as is.
    Rejected {
        /// Idempotency key echoed back.
        client_id: Uuid,
        /// Machine-readable rejection code.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },
}

impl UpsertOutcome {
    /// Returns the client id this outcome refers to.
    #[must_use]
    pub fn client_id(&self) -> Uuid {
        match self {
            UpsertOutcome::Applied { client_id, .. }
            | UpsertOutcome::Unchanged { client_id, .. }
            | UpsertOutcome::Conflict { client_id, .. }
            | UpsertOutcome::Rejected { client_id, .. } => *client_id,
        }
    }
}

/// The server's copy of a record, returned on conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Server-assigned id.
    pub remote_id: String,
    /// Domain fields, CBOR-encoded.
    pub payload: Vec<u8>,
    /// Server-side last modification timestamp.
    pub updated_at_ms: u64,
}

/// Machine-readable validation rejection codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// A required field is missing or empty.
    MissingRequiredField,
    /// Latitude or longitude outside the valid range.
    InvalidCoordinates,
    /// A sample references a session the server does not know.
    UnknownParent,
    /// The payload shape failed schema validation.
    ValidationFailed,
    /// Any other non-retryable rejection.
    Other(String),
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::MissingRequiredField => write!(f, "missing_required_field"),
            ErrorCode::InvalidCoordinates => write!(f, "invalid_coordinates"),
            ErrorCode::UnknownParent => write!(f, "unknown_parent"),
            ErrorCode::ValidationFailed => write!(f, "validation_failed"),
            ErrorCode::Other(code) => write!(f, "{code}"),
        }
    }
}
