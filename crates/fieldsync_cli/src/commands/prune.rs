//! Prune command implementation.

use fieldsync_store::{LocalStore, StorageMonitor};
use std::sync::Arc;

/// Deletes already-synced records until the target free percentage is
/// reached, then reports the result.
pub fn run(store: &Arc<LocalStore>, target_free_pct: u8) -> Result<(), Box<dyn std::error::Error>> {
    if target_free_pct > 100 {
        return Err("target free percentage must be at most 100".into());
    }

    let monitor = StorageMonitor::new(Arc::clone(store));
    let before = store.compute_metrics()?;
    let freed = monitor.free_storage(target_free_pct)?;
    let after = store.storage_metrics();

    println!("freed {freed} bytes of synced records");
    println!(
        "usage: {}% -> {}%",
        before.used_pct(),
        after.used_pct()
    );
    if freed == 0 && after.used_pct() > 100 - target_free_pct {
        println!("nothing prunable: unsynced and quarantined data is never deleted");
    }
    Ok(())
}
