//! The durable local store.
//!
//! `LocalStore` holds every persisted entity in typed in-memory tables
//! and makes each mutation durable through a single journal frame. All
//! multi-row mutations go through [`LocalStore::transaction`], so a
//! crash mid-operation leaves either the pre- or post-state, never a
//! mix.

use crate::crypto::{EncryptionKey, FrameCipher};
use crate::error::{StoreError, StoreResult};
use crate::journal::{Journal, Table, TableOp};
use crate::model::{
    now_ms, PendingRecord, QuarantinedRecord, RecordKind, RecordPayload, ReviewStatus,
    StorageMetrics, SyncLogEntry, SyncMetadata, SyncStatus,
};
use fieldsync_storage::{FileBackend, InMemoryBackend};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use uuid::Uuid;

const JOURNAL_FILE: &str = "journal.fsl";
const LOCK_FILE: &str = "LOCK";
const SINGLETON_KEY: &[u8] = b"row";

/// Options for opening a store.
#[derive(Debug)]
pub struct StoreOptions {
    /// Journal encryption key. `None` opens an unencrypted store.
    pub key: Option<EncryptionKey>,
    /// Log rotation ceiling: oldest entries are dropped past this.
    pub max_log_entries: usize,
    /// Capacity budget reported through [`StorageMetrics`].
    pub capacity_bytes: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            key: None,
            max_log_entries: 1000,
            capacity_bytes: 256 * 1024 * 1024,
        }
    }
}

/// In-memory view of all persisted tables.
#[derive(Debug, Default)]
struct Tables {
    pending: BTreeMap<Uuid, PendingRecord>,
    metadata: SyncMetadata,
    quarantine: BTreeMap<Uuid, QuarantinedRecord>,
    log: BTreeMap<u64, SyncLogEntry>,
    metrics: StorageMetrics,
    /// Next log sequence number.
    log_seq: u64,
}

impl Tables {
    fn apply(&mut self, op: &TableOp) -> StoreResult<()> {
        match op {
            TableOp::Put { table, key, value } => match table {
                Table::Pending => {
                    self.pending.insert(uuid_key(key)?, from_cbor(value)?);
                }
                Table::Metadata => self.metadata = from_cbor(value)?,
                Table::Quarantine => {
                    self.quarantine.insert(uuid_key(key)?, from_cbor(value)?);
                }
                Table::Log => {
                    let seq = seq_key(key)?;
                    self.log.insert(seq, from_cbor(value)?);
                    self.log_seq = self.log_seq.max(seq + 1);
                }
                Table::Metrics => self.metrics = from_cbor(value)?,
            },
            TableOp::Delete { table, key } => match table {
                Table::Pending => {
                    self.pending.remove(&uuid_key(key)?);
                }
                Table::Quarantine => {
                    self.quarantine.remove(&uuid_key(key)?);
                }
                Table::Log => {
                    self.log.remove(&seq_key(key)?);
                }
                Table::Metadata | Table::Metrics => {
                    return Err(StoreError::Corrupted(
                        "delete of a singleton row".into(),
                    ));
                }
            },
        }
        Ok(())
    }

    /// Serializes the live state as one compact op batch.
    fn live_ops(&self) -> StoreResult<Vec<TableOp>> {
        let mut ops = Vec::new();
        for (id, record) in &self.pending {
            ops.push(TableOp::Put {
                table: Table::Pending,
                key: id.as_bytes().to_vec(),
                value: to_cbor(record)?,
            });
        }
        ops.push(TableOp::Put {
            table: Table::Metadata,
            key: SINGLETON_KEY.to_vec(),
            value: to_cbor(&self.metadata)?,
        });
        for (id, row) in &self.quarantine {
            ops.push(TableOp::Put {
                table: Table::Quarantine,
                key: id.as_bytes().to_vec(),
                value: to_cbor(row)?,
            });
        }
        for (seq, entry) in &self.log {
            ops.push(TableOp::Put {
                table: Table::Log,
                key: seq.to_be_bytes().to_vec(),
                value: to_cbor(entry)?,
            });
        }
        ops.push(TableOp::Put {
            table: Table::Metrics,
            key: SINGLETON_KEY.to_vec(),
            value: to_cbor(&self.metrics)?,
        });
        Ok(ops)
    }
}

struct Inner {
    journal: Journal,
    tables: Tables,
    /// Ops applied since the last compaction, including replay.
    ops_since_compact: u64,
}

/// Per-table row and byte counts, for inspection tooling.
#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    /// Total pending-table rows (drainable + synced).
    pub pending_rows: u64,
    /// Rows still awaiting upload.
    pub drainable_rows: u64,
    /// Rows acknowledged by the remote store.
    pub synced_rows: u64,
    /// Quarantined rows.
    pub quarantined_rows: u64,
    /// Log entries.
    pub log_entries: u64,
    /// Journal file size in bytes.
    pub journal_bytes: u64,
}

/// The durable, encrypted, transactional local store.
pub struct LocalStore {
    inner: Mutex<Inner>,
    max_log_entries: usize,
    capacity_bytes: u64,
    /// Held for the lifetime of the store; fs2 releases it on drop.
    _dir_lock: Option<File>,
}

impl LocalStore {
    /// Opens or creates a store in `dir` with default options.
    ///
    /// # Errors
    ///
    /// Fails if another process holds the directory lock, the journal
    /// is corrupt, or I/O fails.
    pub fn open(dir: &Path) -> StoreResult<Self> {
        Self::open_with_options(dir, StoreOptions::default())
    }

    /// Opens or creates a store in `dir`.
    ///
    /// Acquires an exclusive directory lock, replays the journal
    /// (truncating a torn tail frame), and compacts if the journal has
    /// accumulated enough superseded frames.
    pub fn open_with_options(dir: &Path, options: StoreOptions) -> StoreResult<Self> {
        std::fs::create_dir_all(dir).map_err(fieldsync_storage::StorageError::from)?;

        let lock_file = File::create(dir.join(LOCK_FILE))
            .map_err(fieldsync_storage::StorageError::from)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked(dir.display().to_string()))?;

        let backend = FileBackend::open(&dir.join(JOURNAL_FILE))?;
        let cipher = options.key.as_ref().map(FrameCipher::new);
        let journal = Journal::new(Box::new(backend), cipher);

        let mut store = Self::from_journal(journal, &options, Some(lock_file))?;
        store.compact_if_worthwhile()?;
        Ok(store)
    }

    /// Opens a fully ephemeral in-memory store, mainly for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open_in_memory_with_options(StoreOptions::default())
    }

    /// Opens an in-memory store with custom options.
    pub fn open_in_memory_with_options(options: StoreOptions) -> StoreResult<Self> {
        let cipher = options.key.as_ref().map(FrameCipher::new);
        let journal = Journal::new(Box::new(InMemoryBackend::new()), cipher);
        Self::from_journal(journal, &options, None)
    }

    fn from_journal(
        mut journal: Journal,
        options: &StoreOptions,
        dir_lock: Option<File>,
    ) -> StoreResult<Self> {
        let ops = journal.replay()?;
        let mut tables = Tables::default();
        for op in &ops {
            tables.apply(op)?;
        }

        tracing::debug!(
            replayed_ops = ops.len(),
            pending = tables.pending.len(),
            quarantined = tables.quarantine.len(),
            "local store opened"
        );

        Ok(Self {
            inner: Mutex::new(Inner {
                journal,
                tables,
                ops_since_compact: ops.len() as u64,
            }),
            max_log_entries: options.max_log_entries,
            capacity_bytes: options.capacity_bytes,
            _dir_lock: dir_lock,
        })
    }

    /// Runs `f` inside one all-or-nothing transaction.
    ///
    /// Mutations staged through the [`StoreTxn`] become durable in a
    /// single journal frame when `f` returns `Ok`; on `Err` nothing is
    /// written. Reads inside the closure see the pre-transaction state.
    pub fn transaction<R>(
        &self,
        f: impl FnOnce(&mut StoreTxn<'_>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let mut txn = StoreTxn {
            tables: &inner.tables,
            next_log_seq: inner.tables.log_seq,
            ops: Vec::new(),
        };
        let out = f(&mut txn)?;
        let ops = txn.ops;

        if !ops.is_empty() {
            inner.journal.commit(&ops)?;
            for op in &ops {
                inner.tables.apply(op)?;
            }
            inner.ops_since_compact += ops.len() as u64;
        }
        Ok(out)
    }

    // ---- producer interface ----

    /// Appends a caller-formed record to the pending queue.
    ///
    /// The caller supplies `client_id` (a UUIDv4 minted at capture
    /// time) and `captured_at_ms`. Never blocks on network. Bumps the
    /// matching pending count in the same transaction.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate `client_id`, or if a sample has no parent.
    pub fn enqueue(&self, record: PendingRecord) -> StoreResult<()> {
        if record.kind == RecordKind::Sample && record.parent_client_id.is_none() {
            return Err(StoreError::InvalidArgument(
                "sample record requires a parent session".into(),
            ));
        }
        self.transaction(|txn| {
            if txn.tables.pending.contains_key(&record.client_id) {
                return Err(StoreError::DuplicateRecord(record.client_id));
            }
            let mut metadata = txn.tables.metadata.clone();
            match record.kind {
                RecordKind::Session => metadata.pending_sessions += 1,
                RecordKind::Sample => metadata.pending_samples += 1,
            }
            txn.put_pending(&record)?;
            txn.set_metadata(&metadata)?;
            Ok(())
        })
    }

    // ---- pending queue ----

    /// Returns up to `limit` drainable records of `kind`, in
    /// `captured_at` ascending order (ties broken by client id).
    pub fn pending_in_capture_order(
        &self,
        kind: RecordKind,
        limit: usize,
    ) -> Vec<PendingRecord> {
        let inner = self.inner.lock();
        let mut records: Vec<&PendingRecord> = inner
            .tables
            .pending
            .values()
            .filter(|r| r.kind == kind && r.sync_status.is_drainable())
            .collect();
        records.sort_by(|a, b| {
            a.captured_at_ms
                .cmp(&b.captured_at_ms)
                .then(a.client_id.cmp(&b.client_id))
        });
        records.into_iter().take(limit).cloned().collect()
    }

    /// Looks up a record by client id.
    pub fn get_record(&self, client_id: Uuid) -> Option<PendingRecord> {
        self.inner.lock().tables.pending.get(&client_id).cloned()
    }

    /// Returns the server-assigned id of a synced record, if any.
    pub fn remote_id_of(&self, client_id: Uuid) -> Option<String> {
        self.inner
            .lock()
            .tables
            .pending
            .get(&client_id)
            .and_then(|r| r.remote_id.clone())
    }

    /// Marks a batch as in-flight and counts the attempt.
    pub fn mark_batch_syncing(&self, ids: &[Uuid]) -> StoreResult<()> {
        self.transaction(|txn| {
            for id in ids {
                let mut record = txn.require_pending(*id)?;
                record.sync_status = SyncStatus::Syncing;
                record.sync_attempts += 1;
                txn.put_pending(&record)?;
            }
            Ok(())
        })
    }

    /// Marks a batch synced and decrements pending counts, all in one
    /// transaction.
    pub fn mark_batch_synced(&self, outcomes: &[(Uuid, Option<String>)]) -> StoreResult<()> {
        self.transaction(|txn| {
            let mut metadata = txn.tables.metadata.clone();
            for (id, remote_id) in outcomes {
                let mut record = txn.require_pending(*id)?;
                if record.sync_status == SyncStatus::Synced {
                    continue;
                }
                record.sync_status = SyncStatus::Synced;
                record.last_error = None;
                if remote_id.is_some() {
                    record.remote_id = remote_id.clone();
                }
                decrement_count(&mut metadata, record.kind);
                txn.put_pending(&record)?;
            }
            txn.set_metadata(&metadata)?;
            Ok(())
        })
    }

    /// Records a failed attempt for a batch; the records stay queued.
    pub fn mark_batch_error(&self, ids: &[Uuid], message: &str) -> StoreResult<()> {
        self.transaction(|txn| {
            for id in ids {
                let mut record = txn.require_pending(*id)?;
                record.sync_status = SyncStatus::Error;
                record.last_error = Some(message.to_string());
                txn.put_pending(&record)?;
            }
            Ok(())
        })
    }

    /// Applies a remote-wins conflict resolution: overwrites the local
    /// payload with the remote snapshot and marks the record synced.
    pub fn apply_remote(
        &self,
        client_id: Uuid,
        payload: RecordPayload,
        updated_at_ms: u64,
        remote_id: String,
    ) -> StoreResult<()> {
        self.transaction(|txn| {
            let mut record = txn.require_pending(client_id)?;
            let mut metadata = txn.tables.metadata.clone();
            if record.sync_status.is_drainable() {
                decrement_count(&mut metadata, record.kind);
            }
            record.payload = payload;
            record.updated_at_ms = updated_at_ms;
            record.remote_id = Some(remote_id);
            record.sync_status = SyncStatus::Synced;
            record.last_error = None;
            txn.put_pending(&record)?;
            txn.set_metadata(&metadata)?;
            Ok(())
        })
    }

    // ---- sync metadata ----

    /// Returns the engine-wide sync metadata.
    pub fn metadata(&self) -> SyncMetadata {
        self.inner.lock().tables.metadata.clone()
    }

    /// Transactionally updates the sync metadata singleton.
    pub fn update_metadata(&self, f: impl FnOnce(&mut SyncMetadata)) -> StoreResult<()> {
        self.transaction(|txn| {
            let mut metadata = txn.tables.metadata.clone();
            f(&mut metadata);
            txn.set_metadata(&metadata)
        })
    }

    // ---- quarantine ----

    /// Moves a pending record into quarantine, losslessly, in one
    /// transaction: delete from the queue, insert the quarantined row,
    /// decrement the pending count.
    pub fn move_to_quarantine(
        &self,
        client_id: Uuid,
        error_code: &str,
        error_message: &str,
    ) -> StoreResult<QuarantinedRecord> {
        self.transaction(|txn| {
            let record = txn.require_pending(client_id)?;
            let mut metadata = txn.tables.metadata.clone();
            if record.sync_status.is_drainable() {
                decrement_count(&mut metadata, record.kind);
            }

            let quarantined = QuarantinedRecord {
                id: Uuid::new_v4(),
                kind: record.kind,
                original_id: record.client_id,
                record_data: to_cbor(&record)?,
                error_code: error_code.to_string(),
                error_message: error_message.to_string(),
                quarantined_at_ms: now_ms(),
                review_status: ReviewStatus::Pending,
                review_notes: None,
            };

            txn.delete_pending(client_id);
            txn.put_quarantined(&quarantined)?;
            txn.set_metadata(&metadata)?;
            Ok(quarantined)
        })
    }

    /// Lists quarantined records, optionally filtered by kind and
    /// review status, oldest first.
    pub fn list_quarantined(
        &self,
        kind: Option<RecordKind>,
        status: Option<ReviewStatus>,
        limit: usize,
    ) -> Vec<QuarantinedRecord> {
        let inner = self.inner.lock();
        let mut rows: Vec<&QuarantinedRecord> = inner
            .tables
            .quarantine
            .values()
            .filter(|q| kind.is_none_or(|k| q.kind == k))
            .filter(|q| status.is_none_or(|s| q.review_status == s))
            .collect();
        rows.sort_by_key(|q| q.quarantined_at_ms);
        rows.into_iter().take(limit).cloned().collect()
    }

    /// Applies a terminal review decision to a quarantined record.
    ///
    /// # Errors
    ///
    /// Fails if the row does not exist or was already reviewed.
    pub fn update_review(
        &self,
        id: Uuid,
        status: ReviewStatus,
        notes: Option<String>,
    ) -> StoreResult<()> {
        if status == ReviewStatus::Pending {
            return Err(StoreError::InvalidArgument(
                "review can only move to a terminal status".into(),
            ));
        }
        self.transaction(|txn| {
            let mut row = txn
                .tables
                .quarantine
                .get(&id)
                .cloned()
                .ok_or(StoreError::NotFound(id))?;
            if row.review_status != ReviewStatus::Pending {
                return Err(StoreError::AlreadyReviewed(id));
            }
            row.review_status = status;
            row.review_notes = notes;
            txn.put_quarantined(&row)?;
            Ok(())
        })
    }

    // ---- sync log ----

    /// Appends a log entry, rotating out the oldest entries past the
    /// configured ceiling.
    pub fn append_log(&self, entry: SyncLogEntry) -> StoreResult<()> {
        let max = self.max_log_entries;
        self.transaction(|txn| {
            txn.push_log(&entry)?;
            let len_after = txn.tables.log.len() + 1;
            if len_after > max {
                let overflow = len_after - max;
                let oldest: Vec<u64> =
                    txn.tables.log.keys().take(overflow).copied().collect();
                for seq in oldest {
                    txn.drop_log(seq);
                }
            }
            Ok(())
        })
    }

    /// Returns the most recent log entries, newest first.
    pub fn recent_logs(&self, limit: usize) -> Vec<SyncLogEntry> {
        let inner = self.inner.lock();
        inner
            .tables
            .log
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    // ---- storage metrics and pruning ----

    /// Recomputes and persists the storage usage snapshot.
    pub fn compute_metrics(&self) -> StoreResult<StorageMetrics> {
        let capacity = self.capacity_bytes;
        self.transaction(|txn| {
            let mut pending_bytes = 0u64;
            for record in txn.tables.pending.values() {
                pending_bytes += to_cbor(record)?.len() as u64;
            }
            let mut quarantine_bytes = 0u64;
            for row in txn.tables.quarantine.values() {
                quarantine_bytes += to_cbor(row)?.len() as u64;
            }
            let mut log_bytes = 0u64;
            for entry in txn.tables.log.values() {
                log_bytes += to_cbor(entry)?.len() as u64;
            }
            let metadata_bytes = to_cbor(&txn.tables.metadata)?.len() as u64;

            let metrics = StorageMetrics {
                total_capacity_bytes: capacity,
                used_bytes: pending_bytes + quarantine_bytes + log_bytes + metadata_bytes,
                pending_bytes,
                quarantine_bytes,
                log_bytes,
                metadata_bytes,
                last_calculated_ms: now_ms(),
                ..txn.tables.metrics.clone()
            };
            txn.set_metrics(&metrics)?;
            Ok(metrics)
        })
    }

    /// Returns the last computed storage metrics.
    pub fn storage_metrics(&self) -> StorageMetrics {
        self.inner.lock().tables.metrics.clone()
    }

    /// Deletes already-synced records, oldest first, until roughly
    /// `target_bytes` have been freed or nothing prunable remains.
    ///
    /// Drainable and quarantined rows are never eligible. Returns the
    /// estimated bytes freed. Compacts the journal afterwards.
    pub fn prune_synced(&self, target_bytes: u64) -> StoreResult<u64> {
        let freed = self.transaction(|txn| {
            let mut synced: Vec<&PendingRecord> = txn
                .tables
                .pending
                .values()
                .filter(|r| r.sync_status == SyncStatus::Synced)
                .collect();
            synced.sort_by_key(|r| r.captured_at_ms);

            let mut freed = 0u64;
            let mut doomed = Vec::new();
            for record in synced {
                if freed >= target_bytes {
                    break;
                }
                freed += to_cbor(record)?.len() as u64;
                doomed.push(record.client_id);
            }
            for id in doomed {
                txn.delete_pending(id);
            }
            Ok(freed)
        })?;

        if freed > 0 {
            self.compact()?;
        }
        Ok(freed)
    }

    /// Rewrites the journal from the live tables, dropping superseded
    /// frames.
    pub fn compact(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let ops = inner.tables.live_ops()?;
        inner.journal.rewrite(&ops)?;
        inner.ops_since_compact = ops.len() as u64;
        tracing::debug!(live_ops = ops.len(), "journal compacted");
        Ok(())
    }

    fn compact_if_worthwhile(&mut self) -> StoreResult<()> {
        let should = {
            let inner = self.inner.lock();
            let live = (inner.tables.pending.len()
                + inner.tables.quarantine.len()
                + inner.tables.log.len()
                + 2) as u64;
            inner.ops_since_compact > 64 && inner.ops_since_compact > live * 2
        };
        if should {
            self.compact()?;
        }
        Ok(())
    }

    /// Returns per-table row counts for inspection tooling.
    pub fn table_stats(&self) -> StoreResult<TableStats> {
        let inner = self.inner.lock();
        let drainable = inner
            .tables
            .pending
            .values()
            .filter(|r| r.sync_status.is_drainable())
            .count() as u64;
        let total = inner.tables.pending.len() as u64;
        Ok(TableStats {
            pending_rows: total,
            drainable_rows: drainable,
            synced_rows: total - drainable,
            quarantined_rows: inner.tables.quarantine.len() as u64,
            log_entries: inner.tables.log.len() as u64,
            journal_bytes: inner.journal.size()?,
        })
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore").finish_non_exhaustive()
    }
}

/// A staged transaction against the store.
///
/// Reads see the pre-transaction state; writes are staged and become
/// visible (and durable) only when the closure returns `Ok`.
pub struct StoreTxn<'a> {
    tables: &'a Tables,
    next_log_seq: u64,
    ops: Vec<TableOp>,
}

impl StoreTxn<'_> {
    /// Stages an insert/replace of a pending record.
    pub fn put_pending(&mut self, record: &PendingRecord) -> StoreResult<()> {
        self.ops.push(TableOp::Put {
            table: Table::Pending,
            key: record.client_id.as_bytes().to_vec(),
            value: to_cbor(record)?,
        });
        Ok(())
    }

    /// Stages a delete of a pending record.
    pub fn delete_pending(&mut self, client_id: Uuid) {
        self.ops.push(TableOp::Delete {
            table: Table::Pending,
            key: client_id.as_bytes().to_vec(),
        });
    }

    /// Stages a replacement of the sync metadata singleton.
    pub fn set_metadata(&mut self, metadata: &SyncMetadata) -> StoreResult<()> {
        self.ops.push(TableOp::Put {
            table: Table::Metadata,
            key: SINGLETON_KEY.to_vec(),
            value: to_cbor(metadata)?,
        });
        Ok(())
    }

    /// Stages an insert/replace of a quarantined row.
    pub fn put_quarantined(&mut self, row: &QuarantinedRecord) -> StoreResult<()> {
        self.ops.push(TableOp::Put {
            table: Table::Quarantine,
            key: row.id.as_bytes().to_vec(),
            value: to_cbor(row)?,
        });
        Ok(())
    }

    /// Stages an append of a log entry.
    pub fn push_log(&mut self, entry: &SyncLogEntry) -> StoreResult<()> {
        let seq = self.next_log_seq;
        self.next_log_seq += 1;
        self.ops.push(TableOp::Put {
            table: Table::Log,
            key: seq.to_be_bytes().to_vec(),
            value: to_cbor(entry)?,
        });
        Ok(())
    }

    /// Stages a delete of a log entry (rotation).
    pub fn drop_log(&mut self, seq: u64) {
        self.ops.push(TableOp::Delete {
            table: Table::Log,
            key: seq.to_be_bytes().to_vec(),
        });
    }

    /// Stages a replacement of the storage metrics singleton.
    pub fn set_metrics(&mut self, metrics: &StorageMetrics) -> StoreResult<()> {
        self.ops.push(TableOp::Put {
            table: Table::Metrics,
            key: SINGLETON_KEY.to_vec(),
            value: to_cbor(metrics)?,
        });
        Ok(())
    }

    fn require_pending(&self, client_id: Uuid) -> StoreResult<PendingRecord> {
        self.tables
            .pending
            .get(&client_id)
            .cloned()
            .ok_or(StoreError::NotFound(client_id))
    }
}

fn decrement_count(metadata: &mut SyncMetadata, kind: RecordKind) {
    match kind {
        RecordKind::Session => {
            metadata.pending_sessions = metadata.pending_sessions.saturating_sub(1);
        }
        RecordKind::Sample => {
            metadata.pending_samples = metadata.pending_samples.saturating_sub(1);
        }
    }
}

fn to_cbor<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(StoreError::codec)?;
    Ok(buf)
}

fn from_cbor<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    ciborium::from_reader(bytes).map_err(StoreError::codec)
}

fn uuid_key(key: &[u8]) -> StoreResult<Uuid> {
    Uuid::from_slice(key).map_err(|_| StoreError::Corrupted("bad uuid row key".into()))
}

fn seq_key(key: &[u8]) -> StoreResult<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| StoreError::Corrupted("bad log row key".into()))?;
    Ok(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogLevel;

    fn session_record(captured_at_ms: u64) -> PendingRecord {
        PendingRecord::session(
            Uuid::new_v4(),
            captured_at_ms,
            RecordPayload::Session {
                started_at_ms: captured_at_ms,
                ended_at_ms: None,
                worker_id: "w-1".into(),
                site_code: Some("north".into()),
            },
        )
    }

    fn sample_record(parent: Uuid, captured_at_ms: u64) -> PendingRecord {
        PendingRecord::sample(
            Uuid::new_v4(),
            parent,
            captured_at_ms,
            RecordPayload::Sample {
                recorded_at_ms: captured_at_ms,
                latitude: 59.3,
                longitude: 18.0,
                accuracy_m: None,
            },
        )
    }

    #[test]
    fn enqueue_bumps_counts() {
        let store = LocalStore::open_in_memory().unwrap();
        let session = session_record(100);
        let parent = session.client_id;
        store.enqueue(session).unwrap();
        store.enqueue(sample_record(parent, 110)).unwrap();
        store.enqueue(sample_record(parent, 120)).unwrap();

        let metadata = store.metadata();
        assert_eq!(metadata.pending_sessions, 1);
        assert_eq!(metadata.pending_samples, 2);
    }

    #[test]
    fn enqueue_rejects_duplicates() {
        let store = LocalStore::open_in_memory().unwrap();
        let record = session_record(100);
        store.enqueue(record.clone()).unwrap();
        assert!(matches!(
            store.enqueue(record),
            Err(StoreError::DuplicateRecord(_))
        ));
        // The failed transaction changed nothing.
        assert_eq!(store.metadata().pending_sessions, 1);
    }

    #[test]
    fn enqueue_rejects_orphan_samples() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut orphan = sample_record(Uuid::new_v4(), 100);
        orphan.parent_client_id = None;
        assert!(matches!(
            store.enqueue(orphan),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn pending_returned_in_capture_order() {
        let store = LocalStore::open_in_memory().unwrap();
        store.enqueue(session_record(300)).unwrap();
        store.enqueue(session_record(100)).unwrap();
        store.enqueue(session_record(200)).unwrap();

        let records = store.pending_in_capture_order(RecordKind::Session, 10);
        let times: Vec<u64> = records.iter().map(|r| r.captured_at_ms).collect();
        assert_eq!(times, vec![100, 200, 300]);

        let limited = store.pending_in_capture_order(RecordKind::Session, 2);
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn mark_batch_synced_is_one_transaction() {
        let store = LocalStore::open_in_memory().unwrap();
        let a = session_record(100);
        let b = session_record(200);
        let (ida, idb) = (a.client_id, b.client_id);
        store.enqueue(a).unwrap();
        store.enqueue(b).unwrap();

        store
            .mark_batch_synced(&[
                (ida, Some("srv-1".into())),
                (idb, Some("srv-2".into())),
            ])
            .unwrap();

        assert_eq!(store.metadata().pending_sessions, 0);
        assert_eq!(store.remote_id_of(ida).as_deref(), Some("srv-1"));
        assert_eq!(
            store.get_record(idb).unwrap().sync_status,
            SyncStatus::Synced
        );
        assert!(store
            .pending_in_capture_order(RecordKind::Session, 10)
            .is_empty());
    }

    #[test]
    fn error_marked_records_stay_drainable() {
        let store = LocalStore::open_in_memory().unwrap();
        let record = session_record(100);
        let id = record.client_id;
        store.enqueue(record).unwrap();

        store.mark_batch_syncing(&[id]).unwrap();
        store.mark_batch_error(&[id], "server unavailable").unwrap();

        let record = store.get_record(id).unwrap();
        assert_eq!(record.sync_status, SyncStatus::Error);
        assert_eq!(record.sync_attempts, 1);
        assert_eq!(record.last_error.as_deref(), Some("server unavailable"));
        assert_eq!(
            store.pending_in_capture_order(RecordKind::Session, 10).len(),
            1
        );
    }

    #[test]
    fn quarantine_moves_record_losslessly() {
        let store = LocalStore::open_in_memory().unwrap();
        let record = session_record(100);
        let id = record.client_id;
        store.enqueue(record.clone()).unwrap();

        let quarantined = store
            .move_to_quarantine(id, "invalid_coordinates", "latitude out of range")
            .unwrap();

        assert!(store.get_record(id).is_none());
        assert_eq!(store.metadata().pending_sessions, 0);
        assert_eq!(quarantined.original_id, id);
        assert_eq!(quarantined.review_status, ReviewStatus::Pending);

        // Original record survives verbatim inside the quarantine row.
        let restored: PendingRecord = from_cbor(&quarantined.record_data).unwrap();
        assert_eq!(restored.client_id, record.client_id);
        assert_eq!(restored.payload, record.payload);
    }

    #[test]
    fn review_transitions_are_terminal() {
        let store = LocalStore::open_in_memory().unwrap();
        let record = session_record(100);
        let id = record.client_id;
        store.enqueue(record).unwrap();
        let q = store.move_to_quarantine(id, "bad", "bad").unwrap();

        store
            .update_review(q.id, ReviewStatus::Resolved, Some("fixed remotely".into()))
            .unwrap();
        assert!(matches!(
            store.update_review(q.id, ReviewStatus::Discarded, None),
            Err(StoreError::AlreadyReviewed(_))
        ));
        // Row is still there - quarantine never deletes.
        assert_eq!(
            store
                .list_quarantined(None, Some(ReviewStatus::Resolved), 10)
                .len(),
            1
        );
    }

    #[test]
    fn log_rotation_drops_oldest() {
        let store = LocalStore::open_in_memory_with_options(StoreOptions {
            max_log_entries: 3,
            ..Default::default()
        })
        .unwrap();

        for i in 0..5 {
            store
                .append_log(SyncLogEntry {
                    timestamp_ms: i,
                    level: LogLevel::Info,
                    message: format!("entry {i}"),
                    metadata: vec![],
                })
                .unwrap();
        }

        let logs = store.recent_logs(10);
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].message, "entry 4");
        assert_eq!(logs[2].message, "entry 2");
    }

    #[test]
    fn metrics_break_down_by_category() {
        let store = LocalStore::open_in_memory().unwrap();
        store.enqueue(session_record(100)).unwrap();
        store
            .append_log(SyncLogEntry {
                timestamp_ms: 1,
                level: LogLevel::Info,
                message: "hello".into(),
                metadata: vec![],
            })
            .unwrap();

        let metrics = store.compute_metrics().unwrap();
        assert!(metrics.pending_bytes > 0);
        assert!(metrics.log_bytes > 0);
        assert!(metrics.metadata_bytes > 0);
        assert_eq!(
            metrics.used_bytes,
            metrics.pending_bytes
                + metrics.quarantine_bytes
                + metrics.log_bytes
                + metrics.metadata_bytes
        );
        assert_eq!(store.storage_metrics(), metrics);
    }

    #[test]
    fn prune_only_touches_synced_records() {
        let store = LocalStore::open_in_memory().unwrap();
        let synced = session_record(100);
        let pending = session_record(200);
        let synced_id = synced.client_id;
        let pending_id = pending.client_id;
        store.enqueue(synced).unwrap();
        store.enqueue(pending).unwrap();
        store.mark_batch_synced(&[(synced_id, None)]).unwrap();

        let quarantine_target = session_record(300);
        let qid = quarantine_target.client_id;
        store.enqueue(quarantine_target).unwrap();
        store.move_to_quarantine(qid, "bad", "bad").unwrap();

        let freed = store.prune_synced(u64::MAX).unwrap();
        assert!(freed > 0);

        // Synced row gone, drainable and quarantined rows untouched.
        assert!(store.get_record(synced_id).is_none());
        assert!(store.get_record(pending_id).is_some());
        assert_eq!(store.list_quarantined(None, None, 10).len(), 1);
        assert_eq!(store.metadata().pending_sessions, 1);
    }

    #[test]
    fn reopen_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let id;
        {
            let store = LocalStore::open(dir.path()).unwrap();
            let record = session_record(100);
            id = record.client_id;
            store.enqueue(record).unwrap();
            store
                .update_metadata(|m| m.sync_in_progress = true)
                .unwrap();
        }

        let store = LocalStore::open(dir.path()).unwrap();
        assert!(store.get_record(id).is_some());
        let metadata = store.metadata();
        assert!(metadata.sync_in_progress);
        assert_eq!(metadata.pending_sessions, 1);
    }

    #[test]
    fn second_open_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let _store = LocalStore::open(dir.path()).unwrap();
        assert!(matches!(
            LocalStore::open(dir.path()),
            Err(StoreError::Locked(_))
        ));
    }

    #[test]
    fn encrypted_store_requires_key() {
        let dir = tempfile::tempdir().unwrap();
        let key = EncryptionKey::generate();
        let id;
        {
            let store = LocalStore::open_with_options(
                dir.path(),
                StoreOptions {
                    key: Some(key.clone()),
                    ..Default::default()
                },
            )
            .unwrap();
            let record = session_record(100);
            id = record.client_id;
            store.enqueue(record).unwrap();
        }

        // Without the key the journal cannot be opened.
        assert!(LocalStore::open(dir.path()).is_err());

        let store = LocalStore::open_with_options(
            dir.path(),
            StoreOptions {
                key: Some(key),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(store.get_record(id).is_some());
    }

    #[test]
    fn failed_transaction_stages_nothing() {
        let store = LocalStore::open_in_memory().unwrap();
        let record = session_record(100);
        store.enqueue(record).unwrap();

        let result: StoreResult<()> = store.transaction(|txn| {
            let entry = SyncLogEntry {
                timestamp_ms: 1,
                level: LogLevel::Info,
                message: "doomed".into(),
                metadata: vec![],
            };
            txn.push_log(&entry)?;
            Err(StoreError::InvalidArgument("abort".into()))
        });
        assert!(result.is_err());
        assert!(store.recent_logs(10).is_empty());
    }
}
