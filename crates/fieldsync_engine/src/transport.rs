//! Remote store abstraction.

use crate::error::{EngineResult, SyncError};
use fieldsync_protocol::{
    BatchUpsertRequest, BatchUpsertResponse, ErrorCode, RemoteRecord, UpsertOutcome, WireKind,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// The remote store the engine drains into.
///
/// One method: a batch upsert that is idempotent on each record's
/// `client_id`. Implementations map their failure modes onto
/// [`SyncError`]; the engine never sees transport detail beyond that.
pub trait RemoteApi: Send + Sync {
    /// Upserts one batch and returns per-record outcomes in request
    /// order.
    fn batch_upsert(&self, request: &BatchUpsertRequest) -> EngineResult<BatchUpsertResponse>;
}

/// An in-memory remote store for tests.
///
/// Behaves like a small real server: upserts are idempotent on
/// `client_id`, samples need a known parent, and conflicts or
/// rejections can be staged per record. Failures can be injected to
/// fail the next N calls.
#[derive(Debug, Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    applied: HashMap<Uuid, String>,
    next_id: u64,
    conflicts: HashMap<Uuid, RemoteRecord>,
    rejections: HashMap<Uuid, (ErrorCode, String)>,
    failures: VecDeque<SyncError>,
    requests: Vec<BatchUpsertRequest>,
}

impl MockRemote {
    /// Creates an empty mock remote.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next call with the given error.
    pub fn inject_failure(&self, error: SyncError) {
        self.state.lock().failures.push_back(error);
    }

    /// Stages a conflict: the next non-force upsert of `client_id`
    /// returns the given remote copy instead of applying.
    pub fn stage_conflict(&self, client_id: Uuid, remote: RemoteRecord) {
        self.state.lock().conflicts.insert(client_id, remote);
    }

    /// Stages a validation rejection for `client_id`.
    pub fn stage_rejection(&self, client_id: Uuid, code: ErrorCode, message: impl Into<String>) {
        self.state
            .lock()
            .rejections
            .insert(client_id, (code, message.into()));
    }

    /// Returns every request seen so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<BatchUpsertRequest> {
        self.state.lock().requests.clone()
    }

    /// Returns the number of applied records.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.state.lock().applied.len()
    }

    /// Returns the server id of an applied record.
    #[must_use]
    pub fn remote_id_of(&self, client_id: Uuid) -> Option<String> {
        self.state.lock().applied.get(&client_id).cloned()
    }
}

impl RemoteApi for MockRemote {
    fn batch_upsert(&self, request: &BatchUpsertRequest) -> EngineResult<BatchUpsertResponse> {
        request.ensure_supported()?;
        let mut state = self.state.lock();
        state.requests.push(request.clone());

        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }

        let mut outcomes = Vec::with_capacity(request.records.len());
        for record in &request.records {
            let client_id = record.client_id;

            if let Some((code, message)) = state.rejections.get(&client_id).cloned() {
                outcomes.push(UpsertOutcome::Rejected {
                    client_id,
                    code,
                    message,
                });
                continue;
            }

            if !record.force {
                if let Some(remote) = state.conflicts.get(&client_id).cloned() {
                    outcomes.push(UpsertOutcome::Conflict { client_id, remote });
                    continue;
                }
            }

            if request.kind == WireKind::Sample && record.parent_remote_id.is_none() {
                outcomes.push(UpsertOutcome::Rejected {
                    client_id,
                    code: ErrorCode::UnknownParent,
                    message: "sample has no parent session".into(),
                });
                continue;
            }

            if let Some(remote_id) = state.applied.get(&client_id).cloned() {
                if record.force {
                    state.conflicts.remove(&client_id);
                    outcomes.push(UpsertOutcome::Applied {
                        client_id,
                        remote_id,
                    });
                } else {
                    outcomes.push(UpsertOutcome::Unchanged {
                        client_id,
                        remote_id,
                    });
                }
                continue;
            }

            state.next_id += 1;
            let remote_id = format!("srv-{}", state.next_id);
            state.applied.insert(client_id, remote_id.clone());
            state.conflicts.remove(&client_id);
            outcomes.push(UpsertOutcome::Applied {
                client_id,
                remote_id,
            });
        }

        Ok(BatchUpsertResponse { outcomes })
    }
}
