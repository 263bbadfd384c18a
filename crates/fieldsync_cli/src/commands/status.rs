//! Status command implementation.

use fieldsync_store::LocalStore;
use serde::Serialize;

/// Sync status view.
#[derive(Debug, Serialize)]
pub struct StatusView {
    /// Derived coarse state.
    pub state: String,
    /// Drainable session records.
    pub pending_sessions: u64,
    /// Drainable sample records.
    pub pending_samples: u64,
    /// When the last run started (ms since epoch).
    pub last_sync_attempt_ms: Option<u64>,
    /// When the last run fully succeeded (ms since epoch).
    pub last_successful_sync_ms: Option<u64>,
    /// Failed runs since the last success.
    pub consecutive_failures: u32,
    /// Backoff the next automatic trigger honors, in seconds.
    pub current_backoff_secs: u64,
    /// Message from the last failed run.
    pub last_error: Option<String>,
}

/// Runs the status command.
pub fn run(store: &LocalStore, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let metadata = store.metadata();
    let pending = metadata.pending_sessions + metadata.pending_samples;
    let state = if metadata.sync_in_progress {
        "syncing"
    } else if metadata.consecutive_failures > 0 {
        "error"
    } else if pending > 0 {
        "pending"
    } else {
        "synced"
    };

    let view = StatusView {
        state: state.to_string(),
        pending_sessions: metadata.pending_sessions,
        pending_samples: metadata.pending_samples,
        last_sync_attempt_ms: metadata.last_sync_attempt_ms,
        last_successful_sync_ms: metadata.last_successful_sync_ms,
        consecutive_failures: metadata.consecutive_failures,
        current_backoff_secs: metadata.current_backoff_secs,
        last_error: metadata.last_error,
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("state:                {}", view.state);
    println!("pending sessions:     {}", view.pending_sessions);
    println!("pending samples:      {}", view.pending_samples);
    println!(
        "last attempt:         {}",
        format_ms(view.last_sync_attempt_ms)
    );
    println!(
        "last success:         {}",
        format_ms(view.last_successful_sync_ms)
    );
    println!("consecutive failures: {}", view.consecutive_failures);
    println!("current backoff:      {}s", view.current_backoff_secs);
    if let Some(error) = &view.last_error {
        println!("last error:           {error}");
    }
    Ok(())
}

fn format_ms(value: Option<u64>) -> String {
    match value {
        Some(ms) => format!("{ms} ms since epoch"),
        None => "never".to_string(),
    }
}
