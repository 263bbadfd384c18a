//! Quarantine review workflow.

use crate::error::StoreResult;
use crate::model::{PendingRecord, QuarantinedRecord, RecordKind, ReviewStatus};
use crate::store::LocalStore;
use std::sync::Arc;
use uuid::Uuid;

/// Operator-facing view over quarantined records.
///
/// Records land here when the remote store rejects them with a
/// non-retryable validation error. They are never retried and never
/// auto-deleted; an operator resolves or discards each one.
#[derive(Debug, Clone)]
pub struct QuarantineStore {
    store: Arc<LocalStore>,
}

impl QuarantineStore {
    /// Creates a review facade over the given store.
    #[must_use]
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Moves a pending record into quarantine.
    pub fn quarantine(
        &self,
        client_id: Uuid,
        error_code: &str,
        error_message: &str,
    ) -> StoreResult<QuarantinedRecord> {
        let row = self
            .store
            .move_to_quarantine(client_id, error_code, error_message)?;
        tracing::warn!(
            record = %client_id,
            code = error_code,
            "record quarantined"
        );
        Ok(row)
    }

    /// Lists rows awaiting review, oldest first.
    #[must_use]
    pub fn pending_review(&self, limit: usize) -> Vec<QuarantinedRecord> {
        self.store
            .list_quarantined(None, Some(ReviewStatus::Pending), limit)
    }

    /// Lists rows with optional kind and status filters, oldest first.
    #[must_use]
    pub fn list(
        &self,
        kind: Option<RecordKind>,
        status: Option<ReviewStatus>,
        limit: usize,
    ) -> Vec<QuarantinedRecord> {
        self.store.list_quarantined(kind, status, limit)
    }

    /// Marks a row resolved. Terminal.
    pub fn resolve(&self, id: Uuid, notes: Option<String>) -> StoreResult<()> {
        self.store.update_review(id, ReviewStatus::Resolved, notes)
    }

    /// Marks a row discarded. Terminal.
    pub fn discard(&self, id: Uuid, reason: Option<String>) -> StoreResult<()> {
        self.store.update_review(id, ReviewStatus::Discarded, reason)
    }

    /// Deserializes the original record preserved in a quarantine row.
    pub fn original_record(&self, row: &QuarantinedRecord) -> StoreResult<PendingRecord> {
        ciborium::from_reader(row.record_data.as_slice())
            .map_err(crate::error::StoreError::codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RecordPayload;

    fn store_with_quarantined() -> (Arc<LocalStore>, QuarantineStore, Uuid) {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let quarantine = QuarantineStore::new(Arc::clone(&store));

        let record = PendingRecord::session(
            Uuid::new_v4(),
            100,
            RecordPayload::Session {
                started_at_ms: 100,
                ended_at_ms: None,
                worker_id: "w-9".into(),
                site_code: None,
            },
        );
        let id = record.client_id;
        store.enqueue(record).unwrap();
        let row = quarantine
            .quarantine(id, "missing_required_field", "workerId unknown")
            .unwrap();
        (store, quarantine, row.id)
    }

    #[test]
    fn pending_review_then_resolve() {
        let (_store, quarantine, row_id) = store_with_quarantined();

        assert_eq!(quarantine.pending_review(10).len(), 1);
        quarantine.resolve(row_id, Some("re-entered manually".into())).unwrap();
        assert!(quarantine.pending_review(10).is_empty());

        let resolved = quarantine.list(None, Some(ReviewStatus::Resolved), 10);
        assert_eq!(resolved.len(), 1);
        assert_eq!(
            resolved[0].review_notes.as_deref(),
            Some("re-entered manually")
        );
    }

    #[test]
    fn original_record_round_trips() {
        let (_store, quarantine, _) = store_with_quarantined();
        let row = quarantine.pending_review(1).remove(0);
        let original = quarantine.original_record(&row).unwrap();
        assert_eq!(original.client_id, row.original_id);
    }
}
