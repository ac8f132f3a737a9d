//! Show the outbox.

use anyhow::Result;
use std::path::Path;
use sync_client::OperationStore;
use sync_types::{OperationStatus, SyncStatus, Timestamp};

use crate::config::{self, ErrorLog};

/// Run the status command.
///
/// Reads the store without recovering interrupted operations, so it is
/// safe to run next to a live engine.
pub async fn run(data_dir: &Path, json: bool) -> Result<SyncStatus> {
    let (_, store) = config::open_store(data_dir).await?;
    let operations = store.list_pending().await?;
    let errors = ErrorLog::load(data_dir).await?.errors;
    let status = SyncStatus::derive(operations, errors);

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", render(&status, Timestamp::now()));
    }
    Ok(status)
}

/// Human-readable status report.
fn render(status: &SyncStatus, now: Timestamp) -> String {
    let mut out = String::new();
    out.push_str("=== outbox status ===\n\n");

    let state = if status.is_syncing {
        "SYNCING"
    } else if status.has_pending_operations() {
        "WAITING"
    } else {
        "IDLE"
    };
    out.push_str(&format!("State: {}\n\n", state));

    if status.has_pending_operations() {
        out.push_str(&format!("Operations ({}):\n", status.pending_count()));
        for op in &status.pending_operations {
            out.push_str(&format!(
                "  {}  {:<6} {:<24} {:<16} retries {}",
                op.id,
                op.op_type.as_str(),
                op.entity.to_string(),
                op.status.as_str(),
                op.retry_count
            ));
            if op.status == OperationStatus::FailedRetryable {
                if let Some(next) = op.next_attempt_at {
                    out.push_str(&format!(", next attempt {}", format_wait(next, now)));
                }
            }
            out.push('\n');
        }
    } else {
        out.push_str("Operations: none\n");
    }

    out.push('\n');
    if status.has_errors() {
        out.push_str(&format!("Errors ({}):\n", status.sync_errors.len()));
        for error in &status.sync_errors {
            out.push_str(&format!(
                "  [{}] {}: {}\n",
                error.kind, error.operation_id, error.message
            ));
            if let Some(suggestion) = &error.recovery_suggestion {
                out.push_str(&format!("      {}\n", suggestion));
            }
        }
    } else {
        out.push_str("Errors: none\n");
    }
    out
}

/// Format the wait until `at` as a short relative string.
fn format_wait(at: Timestamp, now: Timestamp) -> String {
    let wait = at.duration_since(now).as_secs();
    if wait == 0 {
        "now".to_string()
    } else if wait < 60 {
        format!("in {}s", wait)
    } else if wait < 3600 {
        format!("in {}m", wait / 60)
    } else {
        format!("in {}h", wait / 3600)
    }
}
