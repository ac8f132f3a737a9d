//! Drain the outbox once.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use sync_client::{DrainReport, MockBackend};
use sync_types::ExecutionFailure;

use crate::config::{self, ErrorLog};

/// Options for the mock backend.
#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    /// Reject every operation with this validation message.
    pub reject: Option<String>,
}

/// Run the sync command.
///
/// Only the in-memory mock backend is available; without `mock` there is
/// nothing to sync against.
pub async fn run(data_dir: &Path, mock: Option<MockOptions>) -> Result<DrainReport> {
    let Some(options) = mock else {
        anyhow::bail!(
            "No remote backend configured. Use --mock to drain against an in-memory backend."
        );
    };

    let backend = MockBackend::new();
    let engine = config::open_engine(data_dir, Some(Arc::new(backend.clone()))).await?;

    if let Some(reason) = options.reject {
        let queued = engine.status().pending_count();
        backend.fail_times(ExecutionFailure::Validation(reason), queued);
    }

    let report = engine.sync_now().await?;
    let status = engine.status();

    // Logged errors survive only while their operation is queued
    let mut log = ErrorLog::load(data_dir).await?;
    log.errors
        .retain(|e| status.operation(&e.operation_id).is_some());
    log.record(engine.aggregator().errors());
    log.save(data_dir).await?;

    engine.shutdown().await?;

    println!("Sync complete ({} remote calls)", backend.calls());
    println!("  Succeeded:          {}", report.succeeded);
    println!("  Retried:            {}", report.retried);
    println!("  Failed:             {}", report.failed_terminal);
    println!("  Conflicts resolved: {}", report.conflicts_resolved);
    println!("  Still queued:       {}", status.pending_count());
    for entity in &report.blocked {
        println!("  Blocked lane:       {}", entity);
    }
    if !log.errors.is_empty() {
        println!();
        println!(
            "{} sync errors. Run 'outbox status' for details.",
            log.errors.len()
        );
    }

    Ok(report)
}
