//! Storage capacity monitoring and reclamation.

use crate::error::StoreResult;
use crate::model::StorageMetrics;
use crate::store::LocalStore;
use std::sync::Arc;

/// Pressure level derived from a usage snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoragePressure {
    /// Usage below the warning threshold.
    Normal,
    /// Usage at or above the warning threshold.
    Warning,
    /// Usage at or above the critical threshold.
    Critical,
}

/// Watches store usage against the configured thresholds and frees
/// space by pruning already-synced records.
#[derive(Debug, Clone)]
pub struct StorageMonitor {
    store: Arc<LocalStore>,
}

impl StorageMonitor {
    /// Creates a monitor over the given store.
    #[must_use]
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Recomputes usage and returns the fresh snapshot.
    pub fn check(&self) -> StoreResult<StorageMetrics> {
        let metrics = self.store.compute_metrics()?;
        match Self::pressure(&metrics) {
            StoragePressure::Normal => {}
            StoragePressure::Warning => {
                tracing::warn!(used_pct = metrics.used_pct(), "storage usage high");
            }
            StoragePressure::Critical => {
                tracing::error!(used_pct = metrics.used_pct(), "storage usage critical");
            }
        }
        Ok(metrics)
    }

    /// Classifies a snapshot against its own thresholds.
    #[must_use]
    pub fn pressure(metrics: &StorageMetrics) -> StoragePressure {
        let pct = metrics.used_pct();
        if pct >= metrics.critical_threshold_pct {
            StoragePressure::Critical
        } else if pct >= metrics.warning_threshold_pct {
            StoragePressure::Warning
        } else {
            StoragePressure::Normal
        }
    }

    /// Prunes synced records until usage is at most
    /// `100 - target_free_pct` percent of capacity.
    ///
    /// Only records already acknowledged by the remote store are ever
    /// deleted, oldest first. Unsynced and quarantined data is never
    /// touched, so the store can still fill up if nothing is synced.
    /// Returns the estimated bytes freed.
    pub fn free_storage(&self, target_free_pct: u8) -> StoreResult<u64> {
        let metrics = self.store.compute_metrics()?;
        let target_used =
            metrics.total_capacity_bytes / 100 * u64::from(100 - target_free_pct.min(100));
        if metrics.used_bytes <= target_used {
            return Ok(0);
        }

        let freed = self.store.prune_synced(metrics.used_bytes - target_used)?;
        self.store.compute_metrics()?;
        tracing::info!(freed_bytes = freed, "pruned synced records");
        Ok(freed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PendingRecord, RecordPayload};
    use crate::store::StoreOptions;
    use uuid::Uuid;

    fn tiny_store() -> Arc<LocalStore> {
        // Small capacity so a handful of records crosses the thresholds.
        Arc::new(
            LocalStore::open_in_memory_with_options(StoreOptions {
                capacity_bytes: 600,
                ..Default::default()
            })
            .unwrap(),
        )
    }

    fn session(captured_at_ms: u64) -> PendingRecord {
        PendingRecord::session(
            Uuid::new_v4(),
            captured_at_ms,
            RecordPayload::Session {
                started_at_ms: captured_at_ms,
                ended_at_ms: None,
                worker_id: "w-1".into(),
                site_code: None,
            },
        )
    }

    #[test]
    fn pressure_thresholds() {
        let mut metrics = StorageMetrics {
            total_capacity_bytes: 100,
            ..Default::default()
        };

        metrics.used_bytes = 79;
        assert_eq!(StorageMonitor::pressure(&metrics), StoragePressure::Normal);
        metrics.used_bytes = 80;
        assert_eq!(StorageMonitor::pressure(&metrics), StoragePressure::Warning);
        metrics.used_bytes = 95;
        assert_eq!(StorageMonitor::pressure(&metrics), StoragePressure::Critical);
    }

    #[test]
    fn free_storage_prunes_synced_only() {
        let store = tiny_store();
        let monitor = StorageMonitor::new(Arc::clone(&store));

        let mut synced_ids = Vec::new();
        for i in 0..4 {
            let record = session(i * 100);
            synced_ids.push((record.client_id, None));
            store.enqueue(record).unwrap();
        }
        let unsynced = session(10_000);
        let unsynced_id = unsynced.client_id;
        store.enqueue(unsynced).unwrap();
        store.mark_batch_synced(&synced_ids).unwrap();

        let freed = monitor.free_storage(80).unwrap();
        assert!(freed > 0);
        assert!(store.get_record(unsynced_id).is_some());
    }

    #[test]
    fn free_storage_noop_when_under_target() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let monitor = StorageMonitor::new(Arc::clone(&store));
        store.enqueue(session(100)).unwrap();
        assert_eq!(monitor.free_storage(20).unwrap(), 0);
    }
}
