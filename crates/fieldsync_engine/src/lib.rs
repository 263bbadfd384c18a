//! Connectivity-triggered sync engine for the fieldsync local store.
//!
//! The engine drains the durable pending queue into a remote store in
//! capture-ordered batches, sessions before samples, with exponential
//! backoff between failed runs, last-writer-wins conflict resolution,
//! and quarantine for records the server will never accept. It is
//! fully synchronous; platform shells run it on a background thread
//! and feed it triggers.

pub mod backoff;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod http;
pub mod status;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use config::SyncConfig;
pub use conflict::{ConflictResolver, Winner};
pub use engine::{SyncEngine, SyncReport, SyncTrigger, TriggerOutcome};
pub use error::{EngineResult, SyncError};
pub use http::{HttpClient, HttpFailure, HttpRemote, HttpResponse, LoopbackClient, LoopbackServer};
pub use status::{StatusPublisher, StatusSnapshot, SyncProgress, SyncState};
pub use transport::{MockRemote, RemoteApi};
