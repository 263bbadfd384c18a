//! # FieldSync Storage
//!
//! Byte-store backends for the FieldSync journal.
//!
//! Backends are **opaque byte stores**: they read, append, and flush
//! bytes without interpreting them. The journal layer in
//! `fieldsync_store` owns all framing, checksumming, and encryption.
//!
//! ## Available backends
//!
//! - [`InMemoryBackend`] - for tests and ephemeral stores
//! - [`FileBackend`] - persistent storage via OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use fieldsync_storage::{JournalBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame bytes").unwrap();
//! assert_eq!(backend.read_at(offset, 11).unwrap(), b"frame bytes");
//! ```

mod backend;
mod error;
mod file;
mod memory;

pub use backend::JournalBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
