//! Acknowledge sync errors.

use anyhow::Result;
use std::path::Path;

use crate::config::ErrorLog;

/// Run the clear-errors command.
///
/// Queued operations are left alone; a terminal operation stays in its
/// lane until it is retried or dismissed.
pub async fn run(data_dir: &Path) -> Result<usize> {
    let mut log = ErrorLog::load(data_dir).await?;
    let cleared = log.clear();
    if cleared > 0 {
        log.save(data_dir).await?;
    }

    println!("Cleared {} sync errors.", cleared);
    Ok(cleared)
}
