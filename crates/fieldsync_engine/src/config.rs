//! Configuration for the sync engine.

use crate::backoff::BackoffPolicy;
use std::time::Duration;

/// Configuration for sync runs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the remote store (e.g. "https://api.example.com").
    pub base_url: String,
    /// Bearer token for the remote store, if required.
    pub auth_token: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
    /// Records per batch upsert request.
    pub batch_size: usize,
    /// In-run retries of one batch after a server error, before the
    /// run aborts.
    pub max_batch_retries: u32,
    /// Delay between in-run batch retries.
    pub batch_retry_delay: Duration,
    /// Settle delay after a connectivity trigger, so a flapping link
    /// does not start runs it cannot finish.
    pub settle_delay: Duration,
    /// Consecutive failed runs before the status surfaces as needing
    /// attention.
    pub failure_notice_threshold: u32,
    /// Backoff schedule between failed runs.
    pub backoff: BackoffPolicy,
}

impl SyncConfig {
    /// Creates a configuration with default tuning.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
            timeout: Duration::from_secs(30),
            batch_size: 100,
            max_batch_retries: 3,
            batch_retry_delay: Duration::from_secs(1),
            settle_delay: Duration::from_secs(2),
            failure_notice_threshold: 3,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the in-run batch retry budget.
    #[must_use]
    pub fn with_max_batch_retries(mut self, retries: u32) -> Self {
        self.max_batch_retries = retries;
        self
    }

    /// Sets the delay between in-run batch retries.
    #[must_use]
    pub fn with_batch_retry_delay(mut self, delay: Duration) -> Self {
        self.batch_retry_delay = delay;
        self
    }

    /// Sets the connectivity settle delay.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Sets the backoff schedule.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}
