//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// CBOR serialization or deserialization failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// The peer speaks an unsupported protocol version.
    #[error("unsupported protocol version {got} (supported: {supported})")]
    UnsupportedVersion {
        /// Version the peer sent.
        got: u16,
        /// Version this build supports.
        supported: u16,
    },
}

impl ProtocolError {
    /// Creates a codec error from any displayable cause.
    pub fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec(err.to_string())
    }
}
