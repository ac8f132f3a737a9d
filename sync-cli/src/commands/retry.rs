//! Give a failed operation another chance.

use anyhow::Result;
use std::path::Path;
use sync_types::OperationId;

use crate::config::{self, ErrorLog};

/// Run the retry command.
///
/// Resets the operation's retry budget and drops its logged errors. The
/// next `sync` picks it up again.
pub async fn run(data_dir: &Path, id: &OperationId) -> Result<bool> {
    let engine = config::open_engine(data_dir, None).await?;
    let retried = engine.aggregator().retry_operation(id).await?;
    engine.shutdown().await?;

    if !retried {
        println!("Operation {} is not queued; nothing to retry.", id);
        return Ok(false);
    }

    let mut log = ErrorLog::load(data_dir).await?;
    if log.remove_operation(id) > 0 {
        log.save(data_dir).await?;
    }

    println!("Operation {} queued for retry.", id);
    Ok(true)
}
