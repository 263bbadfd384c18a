//! The sync run orchestrator.
//!
//! A run drains the pending queue in batches: all sessions first, then
//! all samples, each batch in capture order. Samples whose parent
//! session has no server id yet are deferred to a later run. Progress
//! is persisted through the store after every batch, so a crash or
//! cancellation loses at most the in-flight batch's acknowledgement,
//! and the remote upsert is idempotent on `client_id` so resending it
//! is harmless.

use crate::backoff::BackoffPolicy;
use crate::config::SyncConfig;
use crate::conflict::{ConflictResolver, Winner};
use crate::error::{EngineResult, SyncError};
use crate::status::{StatusPublisher, StatusSnapshot};
use crate::transport::RemoteApi;
use fieldsync_protocol::{
    BatchUpsertRequest, ProtocolError, RecordUpsert, RemoteRecord, UpsertOutcome, WireKind,
};
use fieldsync_store::{
    now_ms, LocalStore, PendingRecord, QuarantineStore, RecordKind, RecordPayload, SyncLogger,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// What started a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// The device regained connectivity.
    Connectivity,
    /// The app came to the foreground.
    Foreground,
    /// The user asked for a sync explicitly.
    Manual,
    /// A periodic schedule fired.
    Scheduled,
}

impl SyncTrigger {
    fn as_str(self) -> &'static str {
        match self {
            SyncTrigger::Connectivity => "connectivity",
            SyncTrigger::Foreground => "foreground",
            SyncTrigger::Manual => "manual",
            SyncTrigger::Scheduled => "scheduled",
        }
    }
}

/// Counters from one sync run (or a coalesced sequence of runs).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Session records acknowledged this run.
    pub sessions_synced: u64,
    /// Sample records acknowledged this run.
    pub samples_synced: u64,
    /// Conflicts resolved, either direction.
    pub conflicts_resolved: u64,
    /// Records moved to quarantine.
    pub quarantined: u64,
    /// Samples deferred because their parent has no server id yet.
    pub deferred_samples: u64,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl SyncReport {
    fn absorb(&mut self, other: &SyncReport) {
        self.sessions_synced += other.sessions_synced;
        self.samples_synced += other.samples_synced;
        self.conflicts_resolved += other.conflicts_resolved;
        self.quarantined += other.quarantined;
        self.deferred_samples = other.deferred_samples;
        self.duration += other.duration;
    }
}

/// Result of handing a trigger to the engine.
#[derive(Debug)]
pub enum TriggerOutcome {
    /// A run executed.
    Ran(SyncReport),
    /// A run is already active; it will rerun once when it finishes.
    Coalesced,
    /// Still inside the backoff window from the last failure.
    Deferred {
        /// Time until the window closes.
        retry_after: Duration,
    },
}

/// Drains the local pending queue into a remote store.
pub struct SyncEngine<R: RemoteApi> {
    store: Arc<LocalStore>,
    remote: R,
    config: SyncConfig,
    logger: SyncLogger,
    quarantine: QuarantineStore,
    status: StatusPublisher,
    run_lock: Mutex<()>,
    cancelled: AtomicBool,
    rerun_requested: AtomicBool,
}

impl<R: RemoteApi> SyncEngine<R> {
    /// Creates an engine over an opened store.
    ///
    /// If the persisted crash marker says a previous run never
    /// finished, it is cleared here; the interrupted records are still
    /// drainable and the next run picks them up.
    pub fn new(store: Arc<LocalStore>, remote: R, config: SyncConfig) -> EngineResult<Self> {
        let metadata = store.metadata();
        if metadata.sync_in_progress {
            tracing::warn!("previous sync run was interrupted, recovering");
            store.update_metadata(|m| m.sync_in_progress = false)?;
        }

        let status = StatusPublisher::new(config.failure_notice_threshold);
        status.rehydrate(&store.metadata());

        Ok(Self {
            logger: SyncLogger::new(Arc::clone(&store)),
            quarantine: QuarantineStore::new(Arc::clone(&store)),
            store,
            remote,
            config,
            status,
            run_lock: Mutex::new(()),
            cancelled: AtomicBool::new(false),
            rerun_requested: AtomicBool::new(false),
        })
    }

    /// Returns the store this engine drains.
    #[must_use]
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Returns the current status snapshot.
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Subscribes to status updates.
    pub fn subscribe(&self) -> Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    /// Refreshes the published pending count, for callers that just
    /// enqueued records outside a run.
    pub fn refresh_pending_status(&self) {
        let metadata = self.store.metadata();
        self.status
            .set_pending(metadata.pending_sessions, metadata.pending_samples);
    }

    /// Requests cancellation; the active run stops at the next batch
    /// boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Handles a sync trigger.
    ///
    /// Triggers arriving while a run is active coalesce into a single
    /// rerun. Non-manual triggers inside the backoff window are
    /// deferred; a manual trigger always runs. Connectivity triggers
    /// wait out the settle delay first.
    pub fn trigger(&self, trigger: SyncTrigger) -> EngineResult<TriggerOutcome> {
        if self.run_lock.is_locked() {
            self.rerun_requested.store(true, Ordering::SeqCst);
            return Ok(TriggerOutcome::Coalesced);
        }

        if trigger == SyncTrigger::Connectivity && !self.config.settle_delay.is_zero() {
            std::thread::sleep(self.config.settle_delay);
        }

        if trigger != SyncTrigger::Manual {
            if let Some(retry_after) = self.backoff_remaining() {
                tracing::debug!(
                    trigger = trigger.as_str(),
                    retry_after_secs = retry_after.as_secs(),
                    "trigger deferred by backoff"
                );
                return Ok(TriggerOutcome::Deferred { retry_after });
            }
        }

        self.logger
            .info("sync triggered", &[("trigger", trigger.as_str())])?;
        match self.sync_all() {
            Ok(report) => Ok(TriggerOutcome::Ran(report)),
            Err(SyncError::AlreadyRunning) => {
                self.rerun_requested.store(true, Ordering::SeqCst);
                Ok(TriggerOutcome::Coalesced)
            }
            Err(err) => Err(err),
        }
    }

    /// Runs sync to completion, rerunning once per coalesced trigger.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AlreadyRunning`] if a run is active on
    /// another thread; otherwise the first error that aborted the run.
    pub fn sync_all(&self) -> EngineResult<SyncReport> {
        let _guard = self
            .run_lock
            .try_lock()
            .ok_or(SyncError::AlreadyRunning)?;
        self.cancelled.store(false, Ordering::SeqCst);

        let mut total = SyncReport::default();
        loop {
            self.rerun_requested.store(false, Ordering::SeqCst);
            let report = self.run_once()?;
            total.absorb(&report);
            if !self.rerun_requested.swap(false, Ordering::SeqCst) {
                return Ok(total);
            }
            tracing::debug!("rerunning for a coalesced trigger");
        }
    }

    fn backoff_remaining(&self) -> Option<Duration> {
        let metadata = self.store.metadata();
        let last_attempt = metadata.last_sync_attempt_ms?;
        if metadata.current_backoff_secs == 0 {
            return None;
        }
        let window_end = last_attempt + metadata.current_backoff_secs * 1000;
        let now = now_ms();
        (now < window_end).then(|| Duration::from_millis(window_end - now))
    }

    fn run_once(&self) -> EngineResult<SyncReport> {
        let started = Instant::now();
        let started_at = now_ms();
        let before = self.store.metadata();
        let pending_before = before.pending_sessions + before.pending_samples;

        self.store.update_metadata(|m| {
            m.sync_in_progress = true;
            m.last_sync_attempt_ms = Some(started_at);
        })?;
        self.status
            .set_syncing(before.pending_sessions, before.pending_samples, started_at);
        self.logger.info(
            "sync run started",
            &[("pending", &pending_before.to_string())],
        )?;

        let mut report = SyncReport::default();
        match self.drain_all(&mut report) {
            Ok(()) => {
                let finished = now_ms();
                self.store.update_metadata(|m| {
                    m.sync_in_progress = false;
                    m.last_successful_sync_ms = Some(finished);
                    m.consecutive_failures = 0;
                    m.current_backoff_secs = 0;
                    m.last_error = None;
                })?;
                let (sessions_left, samples_left) = self.pending_counts();
                self.status
                    .set_run_succeeded(finished, sessions_left, samples_left);
                self.logger.info(
                    "sync run finished",
                    &[
                        ("sessions", &report.sessions_synced.to_string()),
                        ("samples", &report.samples_synced.to_string()),
                        ("conflicts", &report.conflicts_resolved.to_string()),
                        ("quarantined", &report.quarantined.to_string()),
                        ("deferred", &report.deferred_samples.to_string()),
                    ],
                )?;
                report.duration = started.elapsed();
                Ok(report)
            }
            Err(SyncError::Cancelled) => {
                self.store.update_metadata(|m| m.sync_in_progress = false)?;
                let (sessions_left, samples_left) = self.pending_counts();
                self.status.set_run_cancelled(sessions_left, samples_left);
                self.logger.info("sync run cancelled", &[]).ok();
                Err(SyncError::Cancelled)
            }
            Err(err) => {
                let failures = self.store.metadata().consecutive_failures + 1;
                let delay = if matches!(err, SyncError::RateLimited(_)) {
                    self.config.backoff.extended_delay(failures)
                } else {
                    self.config.backoff.delay(failures)
                };
                let message = err.to_string();
                self.store.update_metadata(|m| {
                    m.sync_in_progress = false;
                    m.consecutive_failures = failures;
                    m.current_backoff_secs = delay.as_secs();
                    m.last_error = Some(message.clone());
                })?;
                let (sessions_left, samples_left) = self.pending_counts();
                self.status
                    .set_run_failed(&message, failures, sessions_left, samples_left, delay);
                self.logger
                    .error(
                        "sync run failed",
                        &[
                            ("error", &message),
                            ("retry_in_secs", &delay.as_secs().to_string()),
                        ],
                    )
                    .ok();
                Err(err)
            }
        }
    }

    fn pending_counts(&self) -> (u64, u64) {
        let metadata = self.store.metadata();
        (metadata.pending_sessions, metadata.pending_samples)
    }

    fn drain_all(&self, report: &mut SyncReport) -> EngineResult<()> {
        // Sessions first: samples cannot upload until their parent has
        // a server id.
        self.drain_kind(RecordKind::Session, report)?;
        self.drain_kind(RecordKind::Sample, report)?;
        Ok(())
    }

    fn drain_kind(&self, kind: RecordKind, report: &mut SyncReport) -> EngineResult<()> {
        let queued = self.store.pending_in_capture_order(kind, usize::MAX);

        let mut ready = Vec::with_capacity(queued.len());
        for record in queued {
            match kind {
                RecordKind::Session => ready.push((record, None)),
                RecordKind::Sample => {
                    let parent_remote_id = record
                        .parent_client_id
                        .and_then(|parent| self.store.remote_id_of(parent));
                    match parent_remote_id {
                        Some(remote_id) => ready.push((record, Some(remote_id))),
                        None => {
                            report.deferred_samples += 1;
                            tracing::debug!(
                                record = %record.client_id,
                                "sample deferred, parent has no server id"
                            );
                        }
                    }
                }
            }
        }

        let operation = match kind {
            RecordKind::Session => "uploading sessions",
            RecordKind::Sample => "uploading samples",
        };
        for batch in ready.chunks(self.config.batch_size) {
            self.check_cancelled()?;
            self.push_batch(kind, batch, report)?;
            self.status
                .set_progress(report.sessions_synced + report.samples_synced, operation);
        }
        Ok(())
    }

    fn push_batch(
        &self,
        kind: RecordKind,
        batch: &[(PendingRecord, Option<String>)],
        report: &mut SyncReport,
    ) -> EngineResult<()> {
        let ids: Vec<Uuid> = batch.iter().map(|(r, _)| r.client_id).collect();
        self.store.mark_batch_syncing(&ids)?;

        let mut upserts = Vec::with_capacity(batch.len());
        for (record, parent_remote_id) in batch {
            upserts.push(RecordUpsert {
                client_id: record.client_id,
                parent_remote_id: parent_remote_id.clone(),
                payload: encode_payload(&record.payload)?,
                captured_at_ms: record.captured_at_ms,
                updated_at_ms: record.updated_at_ms,
                force: false,
            });
        }
        let request = BatchUpsertRequest::new(wire_kind(kind), upserts);

        let response = match self.call_with_retries(&request) {
            Ok(response) => response,
            Err(err) => {
                self.store.mark_batch_error(&ids, &err.to_string())?;
                return Err(err);
            }
        };
        if response.outcomes.len() != batch.len() {
            let err = ProtocolError::codec(format!(
                "expected {} outcomes, got {}",
                batch.len(),
                response.outcomes.len()
            ));
            self.store.mark_batch_error(&ids, "malformed server response")?;
            return Err(err.into());
        }

        let mut synced = Vec::new();
        for ((record, parent_remote_id), outcome) in batch.iter().zip(response.outcomes) {
            match outcome {
                UpsertOutcome::Applied {
                    client_id,
                    remote_id,
                }
                | UpsertOutcome::Unchanged {
                    client_id,
                    remote_id,
                } => synced.push((client_id, Some(remote_id))),
                UpsertOutcome::Conflict { remote, .. } => {
                    self.resolve_conflict(record, parent_remote_id.clone(), remote, kind)?;
                    report.conflicts_resolved += 1;
                }
                UpsertOutcome::Rejected {
                    client_id,
                    code,
                    message,
                } => {
                    self.quarantine
                        .quarantine(client_id, &code.to_string(), &message)?;
                    report.quarantined += 1;
                    self.logger.warn(
                        "record quarantined",
                        &[
                            ("record", &client_id.to_string()),
                            ("code", &code.to_string()),
                        ],
                    )?;
                }
            }
        }

        let count = synced.len() as u64;
        if !synced.is_empty() {
            self.store.mark_batch_synced(&synced)?;
        }
        match kind {
            RecordKind::Session => report.sessions_synced += count,
            RecordKind::Sample => report.samples_synced += count,
        }
        Ok(())
    }

    fn resolve_conflict(
        &self,
        local: &PendingRecord,
        parent_remote_id: Option<String>,
        remote: RemoteRecord,
        kind: RecordKind,
    ) -> EngineResult<()> {
        match ConflictResolver::resolve(local.updated_at_ms, remote.updated_at_ms) {
            Winner::Remote => {
                let payload = decode_payload(&remote.payload);
                self.store.apply_remote(
                    local.client_id,
                    payload,
                    remote.updated_at_ms,
                    remote.remote_id,
                )?;
                self.logger.info(
                    "conflict resolved, server copy kept",
                    &[("record", &local.client_id.to_string())],
                )?;
            }
            Winner::Local => {
                let resubmit = BatchUpsertRequest::new(
                    wire_kind(kind),
                    vec![RecordUpsert {
                        client_id: local.client_id,
                        parent_remote_id,
                        payload: encode_payload(&local.payload)?,
                        captured_at_ms: local.captured_at_ms,
                        updated_at_ms: local.updated_at_ms,
                        force: true,
                    }],
                );
                let response = self.call_with_retries(&resubmit)?;
                match response.outcomes.into_iter().next() {
                    Some(
                        UpsertOutcome::Applied {
                            client_id,
                            remote_id,
                        }
                        | UpsertOutcome::Unchanged {
                            client_id,
                            remote_id,
                        },
                    ) => {
                        self.store
                            .mark_batch_synced(&[(client_id, Some(remote_id))])?;
                        self.logger.info(
                            "conflict resolved, local copy kept",
                            &[("record", &local.client_id.to_string())],
                        )?;
                    }
                    Some(UpsertOutcome::Rejected {
                        client_id,
                        code,
                        message,
                    }) => {
                        self.quarantine
                            .quarantine(client_id, &code.to_string(), &message)?;
                    }
                    _ => {
                        // Force resubmit should never conflict again;
                        // leave the record queued for the next run.
                        self.store.mark_batch_error(
                            &[local.client_id],
                            "conflict persisted after forced resubmit",
                        )?;
                        self.logger.warn(
                            "forced resubmit still conflicted",
                            &[("record", &local.client_id.to_string())],
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    fn call_with_retries(
        &self,
        request: &BatchUpsertRequest,
    ) -> EngineResult<fieldsync_protocol::BatchUpsertResponse> {
        let mut attempt = 0;
        loop {
            match self.remote.batch_upsert(request) {
                Ok(response) => return Ok(response),
                Err(err @ SyncError::Server { .. }) if attempt < self.config.max_batch_retries => {
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        error = %err,
                        "server error, retrying batch"
                    );
                    if !self.config.batch_retry_delay.is_zero() {
                        std::thread::sleep(self.config.batch_retry_delay);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn check_cancelled(&self) -> EngineResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Returns the configured backoff schedule.
    #[must_use]
    pub fn backoff(&self) -> &BackoffPolicy {
        &self.config.backoff
    }
}

impl<R: RemoteApi> std::fmt::Debug for SyncEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("status", &self.status.snapshot())
            .finish_non_exhaustive()
    }
}

fn wire_kind(kind: RecordKind) -> WireKind {
    match kind {
        RecordKind::Session => WireKind::Session,
        RecordKind::Sample => WireKind::Sample,
    }
}

fn encode_payload(payload: &RecordPayload) -> EngineResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(payload, &mut buf).map_err(ProtocolError::codec)?;
    Ok(buf)
}

/// Payloads we cannot decode are preserved verbatim rather than lost.
fn decode_payload(bytes: &[u8]) -> RecordPayload {
    ciborium::from_reader(bytes).unwrap_or_else(|_| RecordPayload::Opaque(bytes.to_vec()))
}
