//! Sync log command.

use fieldsync_store::LocalStore;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct LogView {
    timestamp_ms: u64,
    level: String,
    message: String,
    metadata: Vec<(String, String)>,
}

/// Prints the most recent sync log entries, newest first.
pub fn run(store: &LocalStore, limit: usize, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let entries = store.recent_logs(limit);

    if format == "json" {
        let views: Vec<LogView> = entries
            .iter()
            .map(|entry| LogView {
                timestamp_ms: entry.timestamp_ms,
                level: entry.level.to_string(),
                message: entry.message.clone(),
                metadata: entry.metadata.clone(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("log is empty");
        return Ok(());
    }
    for entry in &entries {
        let context: Vec<String> = entry
            .metadata
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        println!(
            "{}  {:5}  {}  {}",
            entry.timestamp_ms,
            entry.level,
            entry.message,
            context.join(" ")
        );
    }
    Ok(())
}
