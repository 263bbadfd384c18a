//! Quarantine review commands.

use fieldsync_store::{LocalStore, QuarantinedRecord, ReviewStatus};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct QuarantineRow {
    id: Uuid,
    kind: String,
    original_id: Uuid,
    error_code: String,
    error_message: String,
    quarantined_at_ms: u64,
    review_status: String,
    review_notes: Option<String>,
}

impl From<&QuarantinedRecord> for QuarantineRow {
    fn from(row: &QuarantinedRecord) -> Self {
        Self {
            id: row.id,
            kind: row.kind.to_string(),
            original_id: row.original_id,
            error_code: row.error_code.clone(),
            error_message: row.error_message.clone(),
            quarantined_at_ms: row.quarantined_at_ms,
            review_status: status_name(row.review_status).to_string(),
            review_notes: row.review_notes.clone(),
        }
    }
}

/// Lists quarantined records.
pub fn list(
    store: &LocalStore,
    status: Option<&str>,
    limit: usize,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let status = status.map(parse_status).transpose()?;
    let rows = store.list_quarantined(None, status, limit);

    if format == "json" {
        let views: Vec<QuarantineRow> = rows.iter().map(QuarantineRow::from).collect();
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("no quarantined records");
        return Ok(());
    }
    for row in &rows {
        println!(
            "{}  {}  {}  {}  {}",
            row.id,
            row.kind,
            status_name(row.review_status),
            row.error_code,
            row.error_message
        );
    }
    Ok(())
}

/// Marks a row resolved.
pub fn resolve(
    store: &LocalStore,
    id: Uuid,
    notes: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    store.update_review(id, ReviewStatus::Resolved, notes)?;
    println!("resolved {id}");
    Ok(())
}

/// Marks a row discarded.
pub fn discard(
    store: &LocalStore,
    id: Uuid,
    reason: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    store.update_review(id, ReviewStatus::Discarded, reason)?;
    println!("discarded {id}");
    Ok(())
}

fn parse_status(name: &str) -> Result<ReviewStatus, Box<dyn std::error::Error>> {
    match name {
        "pending" => Ok(ReviewStatus::Pending),
        "resolved" => Ok(ReviewStatus::Resolved),
        "discarded" => Ok(ReviewStatus::Discarded),
        other => Err(format!("unknown review status: {other}").into()),
    }
}

fn status_name(status: ReviewStatus) -> &'static str {
    match status {
        ReviewStatus::Pending => "pending",
        ReviewStatus::Resolved => "resolved",
        ReviewStatus::Discarded => "discarded",
    }
}
