//! Persistent sync logging.

use crate::error::StoreResult;
use crate::model::{now_ms, LogLevel, SyncLogEntry};
use crate::store::LocalStore;
use std::sync::Arc;

/// Writes sync events to the store's durable log and mirrors them to
/// the process-wide `tracing` subscriber.
///
/// The durable log survives restarts and is what the operator CLI
/// shows; the tracing mirror is for live diagnostics.
#[derive(Debug, Clone)]
pub struct SyncLogger {
    store: Arc<LocalStore>,
}

impl SyncLogger {
    /// Creates a logger backed by the given store.
    #[must_use]
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Logs at debug level.
    pub fn debug(&self, message: &str, metadata: &[(&str, &str)]) -> StoreResult<()> {
        self.log(LogLevel::Debug, message, metadata)
    }

    /// Logs at info level.
    pub fn info(&self, message: &str, metadata: &[(&str, &str)]) -> StoreResult<()> {
        self.log(LogLevel::Info, message, metadata)
    }

    /// Logs at warn level.
    pub fn warn(&self, message: &str, metadata: &[(&str, &str)]) -> StoreResult<()> {
        self.log(LogLevel::Warn, message, metadata)
    }

    /// Logs at error level.
    pub fn error(&self, message: &str, metadata: &[(&str, &str)]) -> StoreResult<()> {
        self.log(LogLevel::Error, message, metadata)
    }

    fn log(&self, level: LogLevel, message: &str, metadata: &[(&str, &str)]) -> StoreResult<()> {
        let context = format_metadata(metadata);
        match level {
            LogLevel::Debug => tracing::debug!(%context, "{message}"),
            LogLevel::Info => tracing::info!(%context, "{message}"),
            LogLevel::Warn => tracing::warn!(%context, "{message}"),
            LogLevel::Error => tracing::error!(%context, "{message}"),
        }

        self.store.append_log(SyncLogEntry {
            timestamp_ms: now_ms(),
            level,
            message: message.to_string(),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
    }
}

fn format_metadata(metadata: &[(&str, &str)]) -> String {
    metadata
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_land_in_the_durable_log() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let logger = SyncLogger::new(Arc::clone(&store));

        logger.info("sync started", &[("trigger", "connectivity")]).unwrap();
        logger.error("sync failed", &[("error", "timeout")]).unwrap();

        let logs = store.recent_logs(10);
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].level, LogLevel::Error);
        assert_eq!(logs[0].message, "sync failed");
        assert_eq!(logs[1].message, "sync started");
        assert_eq!(
            logs[1].metadata,
            vec![("trigger".to_string(), "connectivity".to_string())]
        );
    }
}
