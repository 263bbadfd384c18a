//! Inspect command implementation.

use fieldsync_store::{LocalStore, StorageMetrics, TableStats};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store directory.
    pub path: String,
    /// Per-table row counts.
    pub tables: TableStats,
    /// Storage usage snapshot, freshly computed.
    pub storage: StorageMetrics,
    /// Usage as a percentage of capacity.
    pub used_pct: u8,
}

/// Runs the inspect command.
pub fn run(
    store: &LocalStore,
    path: &Path,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let tables = store.table_stats()?;
    let storage = store.compute_metrics()?;
    let result = InspectResult {
        path: path.display().to_string(),
        used_pct: storage.used_pct(),
        tables,
        storage,
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("store:             {}", result.path);
    println!("journal size:      {} bytes", result.tables.journal_bytes);
    println!(
        "pending rows:      {} ({} drainable, {} synced)",
        result.tables.pending_rows, result.tables.drainable_rows, result.tables.synced_rows
    );
    println!("quarantined rows:  {}", result.tables.quarantined_rows);
    println!("log entries:       {}", result.tables.log_entries);
    println!(
        "usage:             {} / {} bytes ({}%)",
        result.storage.used_bytes, result.storage.total_capacity_bytes, result.used_pct
    );
    println!(
        "  pending          {} bytes",
        result.storage.pending_bytes
    );
    println!(
        "  quarantine       {} bytes",
        result.storage.quarantine_bytes
    );
    println!("  log              {} bytes", result.storage.log_bytes);
    println!(
        "  metadata         {} bytes",
        result.storage.metadata_bytes
    );
    Ok(())
}
