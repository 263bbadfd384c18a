//! Externally observable sync status.

use fieldsync_store::SyncMetadata;
use parking_lot::Mutex;
use std::sync::mpsc::{Receiver, Sender};
use std::time::Duration;

/// The coarse sync state shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Everything captured has been uploaded.
    Synced,
    /// Records are queued and waiting for a sync opportunity.
    Pending,
    /// A sync run is active.
    Syncing,
    /// Sync keeps failing and may need attention.
    Error,
}

/// Live progress of the active run. Transient, rebuilt each run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncProgress {
    /// Records confirmed by the remote store so far this run.
    pub synced_items: u64,
    /// Records the run set out to upload.
    pub total_items: u64,
    /// What the engine is doing right now.
    pub current_operation: String,
    /// When the run started.
    pub started_at_ms: u64,
}

/// One published status update.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    /// Coarse state.
    pub state: SyncState,
    /// Drainable session records still queued.
    pub pending_sessions: u64,
    /// Drainable sample records still queued.
    pub pending_samples: u64,
    /// When the last fully successful run finished.
    pub last_successful_sync_ms: Option<u64>,
    /// Failed runs since the last success.
    pub consecutive_failures: u32,
    /// Message from the last failed run.
    pub last_error: Option<String>,
    /// True once failures crossed the notice threshold and the user
    /// should be told instead of quietly retrying.
    pub needs_attention: bool,
    /// Time until the next automatic retry; `None` unless the last run
    /// failed.
    pub next_retry_in: Option<Duration>,
    /// Progress of the active run; `None` outside a run.
    pub progress: Option<SyncProgress>,
}

impl StatusSnapshot {
    /// Total drainable records still queued.
    #[must_use]
    pub fn pending_records(&self) -> u64 {
        self.pending_sessions + self.pending_samples
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            state: SyncState::Synced,
            pending_sessions: 0,
            pending_samples: 0,
            last_successful_sync_ms: None,
            consecutive_failures: 0,
            last_error: None,
            needs_attention: false,
            next_retry_in: None,
            progress: None,
        }
    }
}

struct PublisherInner {
    snapshot: StatusSnapshot,
    subscribers: Vec<Sender<StatusSnapshot>>,
}

/// Holds the current status and fans updates out to subscribers.
///
/// Subscribers that drop their receiver are pruned on the next
/// publish. Transient failures below the notice threshold stay in
/// `Pending`; the `Error` state is reserved for failures the user
/// should act on.
pub struct StatusPublisher {
    inner: Mutex<PublisherInner>,
    failure_notice_threshold: u32,
}

impl StatusPublisher {
    /// Creates a publisher starting from the default snapshot.
    #[must_use]
    pub fn new(failure_notice_threshold: u32) -> Self {
        Self {
            inner: Mutex::new(PublisherInner {
                snapshot: StatusSnapshot::default(),
                subscribers: Vec::new(),
            }),
            failure_notice_threshold,
        }
    }

    /// Rebuilds the snapshot from persisted metadata, for cold start.
    pub fn rehydrate(&self, metadata: &SyncMetadata) {
        let pending = metadata.pending_sessions + metadata.pending_samples;
        let state = if metadata.consecutive_failures >= self.failure_notice_threshold {
            SyncState::Error
        } else if pending > 0 {
            SyncState::Pending
        } else {
            SyncState::Synced
        };
        let next_retry_in = (metadata.consecutive_failures > 0
            && metadata.current_backoff_secs > 0)
            .then(|| Duration::from_secs(metadata.current_backoff_secs));
        self.publish(|snapshot| {
            snapshot.state = state;
            snapshot.pending_sessions = metadata.pending_sessions;
            snapshot.pending_samples = metadata.pending_samples;
            snapshot.last_successful_sync_ms = metadata.last_successful_sync_ms;
            snapshot.consecutive_failures = metadata.consecutive_failures;
            snapshot.last_error = metadata.last_error.clone();
            snapshot.next_retry_in = next_retry_in;
        });
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.lock().snapshot.clone()
    }

    /// Registers a subscriber; it receives every future update.
    pub fn subscribe(&self) -> Receiver<StatusSnapshot> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.inner.lock().subscribers.push(tx);
        rx
    }

    /// Marks a run active.
    pub fn set_syncing(&self, pending_sessions: u64, pending_samples: u64, started_at_ms: u64) {
        self.publish(|snapshot| {
            snapshot.state = SyncState::Syncing;
            snapshot.pending_sessions = pending_sessions;
            snapshot.pending_samples = pending_samples;
            snapshot.next_retry_in = None;
            snapshot.progress = Some(SyncProgress {
                synced_items: 0,
                total_items: pending_sessions + pending_samples,
                current_operation: "starting".to_string(),
                started_at_ms,
            });
        });
    }

    /// Publishes batch progress during a run.
    pub fn set_progress(&self, synced_items: u64, current_operation: &str) {
        self.publish(|snapshot| {
            if let Some(progress) = snapshot.progress.as_mut() {
                progress.synced_items = synced_items;
                progress.current_operation = current_operation.to_string();
            }
        });
    }

    /// Marks a run finished successfully.
    pub fn set_run_succeeded(&self, finished_at_ms: u64, pending_sessions: u64, pending_samples: u64) {
        self.publish(|snapshot| {
            snapshot.state = if pending_sessions + pending_samples > 0 {
                SyncState::Pending
            } else {
                SyncState::Synced
            };
            snapshot.pending_sessions = pending_sessions;
            snapshot.pending_samples = pending_samples;
            snapshot.last_successful_sync_ms = Some(finished_at_ms);
            snapshot.consecutive_failures = 0;
            snapshot.last_error = None;
            snapshot.next_retry_in = None;
            snapshot.progress = None;
        });
    }

    /// Marks a run failed; `retry_in` is the backoff delay the next
    /// automatic trigger will honor.
    pub fn set_run_failed(
        &self,
        message: &str,
        consecutive_failures: u32,
        pending_sessions: u64,
        pending_samples: u64,
        retry_in: Duration,
    ) {
        let needs_attention = consecutive_failures >= self.failure_notice_threshold;
        self.publish(|snapshot| {
            snapshot.state = if needs_attention {
                SyncState::Error
            } else {
                SyncState::Pending
            };
            snapshot.pending_sessions = pending_sessions;
            snapshot.pending_samples = pending_samples;
            snapshot.consecutive_failures = consecutive_failures;
            snapshot.last_error = Some(message.to_string());
            snapshot.next_retry_in = Some(retry_in);
            snapshot.progress = None;
        });
    }

    /// Marks a run cancelled before it finished.
    pub fn set_run_cancelled(&self, pending_sessions: u64, pending_samples: u64) {
        self.publish(|snapshot| {
            snapshot.state = if pending_sessions + pending_samples > 0 {
                SyncState::Pending
            } else {
                SyncState::Synced
            };
            snapshot.pending_sessions = pending_sessions;
            snapshot.pending_samples = pending_samples;
            snapshot.progress = None;
        });
    }

    /// Reflects newly enqueued records outside a run.
    pub fn set_pending(&self, pending_sessions: u64, pending_samples: u64) {
        self.publish(|snapshot| {
            if snapshot.state == SyncState::Synced && pending_sessions + pending_samples > 0 {
                snapshot.state = SyncState::Pending;
            }
            snapshot.pending_sessions = pending_sessions;
            snapshot.pending_samples = pending_samples;
            if snapshot.state != SyncState::Syncing {
                snapshot.progress = None;
            }
        });
    }

    fn publish(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        let mut inner = self.inner.lock();
        f(&mut inner.snapshot);
        inner.snapshot.needs_attention =
            inner.snapshot.consecutive_failures >= self.failure_notice_threshold;
        let snapshot = inner.snapshot.clone();
        inner
            .subscribers
            .retain(|subscriber| subscriber.send(snapshot.clone()).is_ok());
    }
}

impl std::fmt::Debug for StatusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPublisher")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_below_threshold_stay_pending() {
        let publisher = StatusPublisher::new(3);
        publisher.set_run_failed("timeout", 1, 3, 2, Duration::from_secs(30));
        assert_eq!(publisher.snapshot().state, SyncState::Pending);
        assert!(!publisher.snapshot().needs_attention);

        publisher.set_run_failed("timeout", 3, 3, 2, Duration::from_secs(120));
        let snapshot = publisher.snapshot();
        assert_eq!(snapshot.state, SyncState::Error);
        assert!(snapshot.needs_attention);
    }

    #[test]
    fn failure_exposes_the_retry_countdown_and_split_counts() {
        let publisher = StatusPublisher::new(3);
        publisher.set_run_failed("no route", 2, 4, 7, Duration::from_secs(60));

        let snapshot = publisher.snapshot();
        assert_eq!(snapshot.pending_sessions, 4);
        assert_eq!(snapshot.pending_samples, 7);
        assert_eq!(snapshot.pending_records(), 11);
        assert_eq!(snapshot.next_retry_in, Some(Duration::from_secs(60)));
    }

    #[test]
    fn success_clears_failures() {
        let publisher = StatusPublisher::new(3);
        publisher.set_run_failed("timeout", 4, 5, 0, Duration::from_secs(240));
        publisher.set_run_succeeded(1_000, 0, 0);

        let snapshot = publisher.snapshot();
        assert_eq!(snapshot.state, SyncState::Synced);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert!(snapshot.last_error.is_none());
        assert!(snapshot.next_retry_in.is_none());
        assert_eq!(snapshot.last_successful_sync_ms, Some(1_000));
    }

    #[test]
    fn success_with_leftovers_is_pending() {
        let publisher = StatusPublisher::new(3);
        publisher.set_run_succeeded(1_000, 0, 2);
        assert_eq!(publisher.snapshot().state, SyncState::Pending);
    }

    #[test]
    fn subscribers_receive_updates_and_are_pruned() {
        let publisher = StatusPublisher::new(3);
        let rx = publisher.subscribe();

        publisher.set_syncing(3, 1, 1_000);
        assert_eq!(rx.recv().unwrap().state, SyncState::Syncing);

        drop(rx);
        // Publishing after the receiver is gone drops the subscriber.
        publisher.set_run_succeeded(1_000, 0, 0);
        assert!(publisher.inner.lock().subscribers.is_empty());
    }

    #[test]
    fn progress_tracks_the_active_run_and_clears_after() {
        let publisher = StatusPublisher::new(3);
        publisher.set_syncing(7, 3, 5_000);

        let progress = publisher.snapshot().progress.unwrap();
        assert_eq!(progress.total_items, 10);
        assert_eq!(progress.synced_items, 0);
        assert_eq!(progress.started_at_ms, 5_000);

        publisher.set_progress(4, "uploading sessions");
        let progress = publisher.snapshot().progress.unwrap();
        assert_eq!(progress.synced_items, 4);
        assert_eq!(progress.current_operation, "uploading sessions");

        publisher.set_run_succeeded(6_000, 0, 0);
        assert!(publisher.snapshot().progress.is_none());
    }

    #[test]
    fn rehydrate_reflects_persisted_failures() {
        let publisher = StatusPublisher::new(3);
        let metadata = SyncMetadata {
            consecutive_failures: 5,
            current_backoff_secs: 480,
            pending_sessions: 1,
            pending_samples: 2,
            last_error: Some("auth".into()),
            ..Default::default()
        };
        publisher.rehydrate(&metadata);

        let snapshot = publisher.snapshot();
        assert_eq!(snapshot.state, SyncState::Error);
        assert_eq!(snapshot.pending_sessions, 1);
        assert_eq!(snapshot.pending_samples, 2);
        assert_eq!(snapshot.next_retry_in, Some(Duration::from_secs(480)));
        assert!(snapshot.needs_attention);
    }
}
