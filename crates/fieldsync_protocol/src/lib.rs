//! Wire types and CBOR codecs for the fieldsync batch upsert protocol.
//!
//! This is a pure protocol crate with no I/O. The engine and any
//! server implementation share these types; bodies on the wire are
//! CBOR produced by [`encode`] and consumed by [`decode`].

pub mod error;
pub mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    BatchUpsertRequest, BatchUpsertResponse, ErrorCode, RecordUpsert, RemoteRecord, UpsertOutcome,
    WireKind,
};

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Encodes a message to CBOR.
///
/// # Errors
///
/// Fails if serialization fails.
pub fn encode<T: serde::Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(message, &mut buf).map_err(ProtocolError::codec)?;
    Ok(buf)
}

/// Decodes a message from CBOR.
///
/// # Errors
///
/// Fails if the bytes are not a valid encoding of `T`.
pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(ProtocolError::codec)
}
