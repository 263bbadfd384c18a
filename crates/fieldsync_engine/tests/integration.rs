//! End-to-end tests: durable store, HTTP transport over a loopback
//! client, and an in-memory remote.

use fieldsync_engine::http::endpoint_for;
use fieldsync_engine::{
    HttpRemote, HttpResponse, LoopbackClient, LoopbackServer, MockRemote, RemoteApi, SyncConfig,
    SyncEngine, SyncError, SyncState, SyncTrigger, TriggerOutcome,
};
use fieldsync_protocol::{decode, encode, BatchUpsertRequest, ErrorCode};
use fieldsync_store::{
    EncryptionKey, LocalStore, PendingRecord, RecordKind, RecordPayload, ReviewStatus,
    StoreOptions, SyncStatus,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Serves the mock remote over the loopback HTTP path.
struct RemoteServer {
    inner: MockRemote,
}

impl RemoteServer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MockRemote::new(),
        })
    }
}

impl LoopbackServer for RemoteServer {
    fn handle(&self, path: &str, body: &[u8]) -> HttpResponse {
        let request: BatchUpsertRequest = match decode(body) {
            Ok(request) => request,
            Err(_) => {
                return HttpResponse {
                    status: 400,
                    body: b"malformed request".to_vec(),
                }
            }
        };
        if path != endpoint_for(request.kind) {
            return HttpResponse {
                status: 404,
                body: Vec::new(),
            };
        }

        match self.inner.batch_upsert(&request) {
            Ok(response) => HttpResponse {
                status: 200,
                body: encode(&response).unwrap(),
            },
            Err(SyncError::Authentication(message)) => HttpResponse {
                status: 401,
                body: message.into_bytes(),
            },
            Err(SyncError::RateLimited(message)) => HttpResponse {
                status: 429,
                body: message.into_bytes(),
            },
            Err(error) => HttpResponse {
                status: 500,
                body: error.to_string().into_bytes(),
            },
        }
    }
}

fn config() -> SyncConfig {
    SyncConfig::new("https://api.example.com")
        .with_auth_token("test-token")
        .with_settle_delay(Duration::ZERO)
        .with_batch_retry_delay(Duration::ZERO)
}

fn engine_over(
    store: Arc<LocalStore>,
    server: Arc<RemoteServer>,
) -> SyncEngine<HttpRemote<LoopbackClient<Arc<RemoteServer>>>> {
    let remote = HttpRemote::new(&config(), LoopbackClient::new(server));
    SyncEngine::new(store, remote, config()).unwrap()
}

fn session(captured_at_ms: u64) -> PendingRecord {
    PendingRecord::session(
        Uuid::new_v4(),
        captured_at_ms,
        RecordPayload::Session {
            started_at_ms: captured_at_ms,
            ended_at_ms: None,
            worker_id: "w-42".into(),
            site_code: Some("east".into()),
        },
    )
}

fn sample(parent: Uuid, captured_at_ms: u64) -> PendingRecord {
    PendingRecord::sample(
        Uuid::new_v4(),
        parent,
        captured_at_ms,
        RecordPayload::Sample {
            recorded_at_ms: captured_at_ms,
            latitude: 59.33,
            longitude: 18.07,
            accuracy_m: Some(6.0),
        },
    )
}

#[test]
fn capture_sync_and_reopen_encrypted() {
    let dir = tempfile::tempdir().unwrap();
    let key = EncryptionKey::generate();
    let open = |key: &EncryptionKey| {
        Arc::new(
            LocalStore::open_with_options(
                dir.path(),
                StoreOptions {
                    key: Some(key.clone()),
                    ..Default::default()
                },
            )
            .unwrap(),
        )
    };

    let server = RemoteServer::new();
    let parent_id;
    {
        let store = open(&key);
        let parent = session(100);
        parent_id = parent.client_id;
        store.enqueue(parent).unwrap();
        store.enqueue(sample(parent_id, 110)).unwrap();
        store.enqueue(sample(parent_id, 120)).unwrap();

        let engine = engine_over(Arc::clone(&store), Arc::clone(&server));
        let report = engine.sync_all().unwrap();
        assert_eq!(report.sessions_synced, 1);
        assert_eq!(report.samples_synced, 2);
        assert_eq!(engine.status().state, SyncState::Synced);
        assert_eq!(server.inner.applied_count(), 3);
    }

    // Everything survives a restart, behind the key.
    let store = open(&key);
    let metadata = store.metadata();
    assert_eq!(metadata.pending_sessions + metadata.pending_samples, 0);
    assert!(metadata.last_successful_sync_ms.is_some());
    let record = store.get_record(parent_id).unwrap();
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert!(record.remote_id.is_some());
}

#[test]
fn outage_then_recovery() {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let server = RemoteServer::new();
    let engine = engine_over(Arc::clone(&store), Arc::clone(&server));
    store.enqueue(session(100)).unwrap();

    // Enough consecutive server failures to exhaust the in-run budget.
    for _ in 0..5 {
        server.inner.inject_failure(SyncError::Server {
            status: 503,
            message: "unavailable".into(),
        });
    }
    assert!(engine.sync_all().is_err());
    let metadata = store.metadata();
    assert_eq!(metadata.consecutive_failures, 1);
    assert!(metadata.current_backoff_secs > 0);

    // Automatic triggers wait out the window; manual does not.
    assert!(matches!(
        engine.trigger(SyncTrigger::Connectivity).unwrap(),
        TriggerOutcome::Deferred { .. }
    ));
    let outcome = engine.trigger(SyncTrigger::Manual).unwrap();
    match outcome {
        TriggerOutcome::Ran(report) => assert_eq!(report.sessions_synced, 1),
        other => panic!("expected a run, got {other:?}"),
    }

    let metadata = store.metadata();
    assert_eq!(metadata.consecutive_failures, 0);
    assert_eq!(metadata.current_backoff_secs, 0);
    assert_eq!(engine.status().state, SyncState::Synced);
}

#[test]
fn auth_failure_is_not_retryable() {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let server = RemoteServer::new();
    let engine = engine_over(Arc::clone(&store), Arc::clone(&server));
    store.enqueue(session(100)).unwrap();
    server
        .inner
        .inject_failure(SyncError::Authentication("token expired".into()));

    let err = engine.sync_all().unwrap_err();
    assert!(err.is_auth());
    assert!(!err.is_retryable());

    // Only one request: auth failures are not retried in-run.
    assert_eq!(server.inner.requests().len(), 1);
    assert_eq!(
        store.metadata().last_error.as_deref(),
        Some("authentication failed: token expired")
    );
}

#[test]
fn rejected_record_review_workflow() {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let server = RemoteServer::new();
    let engine = engine_over(Arc::clone(&store), Arc::clone(&server));

    let good = session(100);
    let bad = session(200);
    let bad_id = bad.client_id;
    store.enqueue(good).unwrap();
    store.enqueue(bad).unwrap();
    server
        .inner
        .stage_rejection(bad_id, ErrorCode::MissingRequiredField, "workerId empty");

    let report = engine.sync_all().unwrap();
    assert_eq!(report.sessions_synced, 1);
    assert_eq!(report.quarantined, 1);

    let quarantine = fieldsync_store::QuarantineStore::new(Arc::clone(&store));
    let rows = quarantine.pending_review(10);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].error_code, "missing_required_field");

    // The preserved record can be inspected and the row closed out.
    let original = quarantine.original_record(&rows[0]).unwrap();
    assert_eq!(original.client_id, bad_id);
    quarantine
        .resolve(rows[0].id, Some("fixed on the backend".into()))
        .unwrap();
    assert!(quarantine.pending_review(10).is_empty());
    assert_eq!(
        quarantine.list(None, Some(ReviewStatus::Resolved), 10).len(),
        1
    );
}

#[test]
fn samples_drain_on_the_run_after_their_parent() {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let server = RemoteServer::new();
    let engine = engine_over(Arc::clone(&store), Arc::clone(&server));

    // Parent enqueued after its samples, and initially rate limited so
    // the first run fails entirely.
    let parent = session(100);
    let parent_id = parent.client_id;
    store.enqueue(sample(parent_id, 90)).unwrap();
    store.enqueue(parent).unwrap();
    server
        .inner
        .inject_failure(SyncError::RateLimited("quota".into()));

    assert!(matches!(
        engine.sync_all(),
        Err(SyncError::RateLimited(_))
    ));
    assert_eq!(
        store
            .pending_in_capture_order(RecordKind::Session, 10)
            .len(),
        1
    );

    let report = engine.sync_all().unwrap();
    assert_eq!(report.sessions_synced, 1);
    assert_eq!(report.samples_synced, 1);
    assert_eq!(report.deferred_samples, 0);
    assert_eq!(server.inner.applied_count(), 2);
}

#[test]
fn status_updates_flow_to_subscribers() {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let server = RemoteServer::new();
    let engine = engine_over(Arc::clone(&store), Arc::clone(&server));
    store.enqueue(session(100)).unwrap();
    engine.refresh_pending_status();

    let rx = engine.subscribe();
    engine.sync_all().unwrap();

    let snapshots: Vec<_> = rx.try_iter().collect();
    let states: Vec<SyncState> = snapshots.iter().map(|snapshot| snapshot.state).collect();
    assert!(states.contains(&SyncState::Syncing));
    assert_eq!(states.last(), Some(&SyncState::Synced));

    // Batch progress was visible mid-run and cleared at the end.
    let progress = snapshots
        .iter()
        .filter_map(|snapshot| snapshot.progress.as_ref())
        .last()
        .unwrap();
    assert_eq!(progress.synced_items, 1);
    assert_eq!(progress.current_operation, "uploading sessions");
    assert!(snapshots.last().unwrap().progress.is_none());
}
