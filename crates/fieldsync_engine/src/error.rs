//! Error types for the sync engine.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, SyncError>;

/// Errors that can occur during a sync run.
///
/// The retryable/fatal split drives the run outcome: retryable errors
/// abort the run and schedule a backoff retry; authentication errors
/// abort and surface to the operator; store errors abort and are
/// retried on the next trigger.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network-level failure reaching the remote store.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the next run may succeed without intervention.
        retryable: bool,
    },

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// The remote store rejected our credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The remote store asked us to slow down.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The remote store failed to process the request.
    #[error("server error (status {status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response detail, if any.
        message: String,
    },

    /// Malformed request or response.
    #[error(transparent)]
    Protocol(#[from] fieldsync_protocol::ProtocolError),

    /// Local store failure.
    #[error(transparent)]
    Store(#[from] fieldsync_store::StoreError),

    /// The run was cancelled at a batch boundary.
    #[error("sync cancelled")]
    Cancelled,

    /// A sync run is already active in this process.
    #[error("sync already in progress")]
    AlreadyRunning,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if a later run may succeed without intervention.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout
            | SyncError::RateLimited(_)
            | SyncError::Server { .. }
            | SyncError::Store(_) => true,
            _ => false,
        }
    }

    /// Returns true if the failure needs new credentials.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Authentication(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("bad certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::RateLimited("slow down".into()).is_retryable());
        assert!(SyncError::Server {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!SyncError::Authentication("expired token".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn auth_classification() {
        assert!(SyncError::Authentication("expired".into()).is_auth());
        assert!(!SyncError::Timeout.is_auth());
    }
}
