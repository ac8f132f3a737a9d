//! Drop an operation without applying it.

use anyhow::Result;
use std::path::Path;
use sync_types::OperationId;

use crate::config::{self, ErrorLog};

/// Run the dismiss command.
pub async fn run(data_dir: &Path, id: &OperationId) -> Result<bool> {
    let engine = config::open_engine(data_dir, None).await?;
    let dismissed = engine.aggregator().dismiss_operation(id).await?;
    engine.shutdown().await?;

    if !dismissed {
        println!("Operation {} is not queued; nothing to dismiss.", id);
        return Ok(false);
    }

    let mut log = ErrorLog::load(data_dir).await?;
    if log.remove_operation(id) > 0 {
        log.save(data_dir).await?;
    }

    println!("Operation {} dismissed.", id);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_client::OperationStore;
    use sync_types::{EntityRef, ErrorKind, NewOperation, SyncError};
    use tempfile::tempdir;

    #[tokio::test]
    async fn dismiss_removes_operation_and_errors() {
        let dir = tempdir().unwrap();
        let (_, store) = config::open_store(dir.path()).await.unwrap();
        let id = store
            .enqueue(NewOperation::delete(EntityRef::new("note", "1")))
            .await
            .unwrap();

        let mut log = ErrorLog::default();
        log.record([SyncError::new(id, ErrorKind::Unknown, "boom", None, false)]);
        log.save(dir.path()).await.unwrap();

        assert!(run(dir.path(), &id).await.unwrap());
        assert!(store.get(&id).await.unwrap().is_none());
        assert!(ErrorLog::load(dir.path()).await.unwrap().errors.is_empty());

        // Second dismiss finds nothing
        assert!(!run(dir.path(), &id).await.unwrap());
    }
}
