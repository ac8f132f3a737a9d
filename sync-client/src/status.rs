//! Sync status aggregation.
//!
//! [`SyncStatusAggregator`] owns the set of surfaced [`SyncError`]s and
//! republishes a [`SyncStatus`] snapshot over a watch channel whenever the
//! store or the error set changes.
//!
//! The aggregator reads the store but never writes it. `retry_operation`
//! and `dismiss_operation` are forwarded as commands to the engine, which
//! performs the store mutation and then asks for a refresh.

use crate::error::{EngineError, Result, StoreError};
use crate::store::OperationStore;
use dashmap::DashMap;
use std::sync::Arc;
use sync_types::{OperationId, SyncError, SyncErrorId, SyncStatus};
use tokio::sync::{mpsc, oneshot, watch, Mutex};

/// Store mutations requested through the aggregator.
#[derive(Debug)]
pub(crate) enum Command {
    /// Reset an operation for another attempt.
    Retry {
        id: OperationId,
        reply: oneshot::Sender<std::result::Result<bool, StoreError>>,
    },
    /// Drop an operation from the queue.
    Dismiss {
        id: OperationId,
        reply: oneshot::Sender<std::result::Result<bool, StoreError>>,
    },
}

/// Publishes the observable sync status.
///
/// Clones share the same error set and channel.
#[derive(Clone)]
pub struct SyncStatusAggregator {
    inner: Arc<AggregatorInner>,
}

struct AggregatorInner {
    store: Arc<dyn OperationStore>,
    errors: DashMap<SyncErrorId, SyncError>,
    status: watch::Sender<SyncStatus>,
    refresh_lock: Mutex<()>,
    commands: mpsc::Sender<Command>,
}

impl SyncStatusAggregator {
    pub(crate) fn new(store: Arc<dyn OperationStore>, commands: mpsc::Sender<Command>) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            inner: Arc::new(AggregatorInner {
                store,
                errors: DashMap::new(),
                status,
                refresh_lock: Mutex::new(()),
                commands,
            }),
        }
    }

    /// Subscribe to status updates.
    ///
    /// The receiver starts at the current snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Latest published snapshot.
    pub fn current(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    /// Surfaced errors, oldest first.
    pub fn errors(&self) -> Vec<SyncError> {
        let mut errors: Vec<SyncError> = self
            .inner
            .errors
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        errors.sort_by_key(|e| (e.occurred_at, e.id));
        errors
    }

    /// Re-read the store and publish a fresh snapshot.
    ///
    /// Refreshes are serialized so a slow read never overwrites a newer one.
    pub async fn refresh(&self) -> std::result::Result<SyncStatus, StoreError> {
        let _guard = self.inner.refresh_lock.lock().await;

        let operations = self.inner.store.list_pending().await?;
        let errors = self
            .inner
            .errors
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let status = SyncStatus::derive(operations, errors);
        self.inner.status.send_replace(status.clone());
        Ok(status)
    }

    /// Reset an operation's retry budget and queue it again.
    ///
    /// Clears the operation's errors. Returns `false` if the operation is no
    /// longer queued (e.g. it already succeeded) or is currently in flight.
    pub async fn retry_operation(&self, id: &OperationId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Retry { id: *id, reply }, rx).await
    }

    /// Remove an operation from the queue without applying it.
    ///
    /// Clears the operation's errors. Returns `false` if the operation is no
    /// longer queued or is currently in flight.
    pub async fn dismiss_operation(&self, id: &OperationId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Dismiss { id: *id, reply }, rx).await
    }

    /// Acknowledge one error. Queued operations are not touched.
    pub async fn clear_sync_error(&self, id: &SyncErrorId) -> Result<bool> {
        let removed = self.inner.errors.remove(id).is_some();
        if removed {
            tracing::debug!("Cleared sync error {}", id);
            self.refresh().await?;
        }
        Ok(removed)
    }

    /// Acknowledge every error. Queued operations are not touched.
    pub async fn clear_all_sync_errors(&self) -> Result<usize> {
        let count = self.inner.errors.len();
        self.inner.errors.clear();
        tracing::debug!("Cleared {} sync errors", count);
        self.refresh().await?;
        Ok(count)
    }

    /// Surface a terminal failure. Replaces any earlier error for the same
    /// operation.
    pub(crate) fn record_error(&self, error: SyncError) {
        let operation_id = error.operation_id;
        self.clear_errors_for(&operation_id);
        self.inner.errors.insert(error.id, error);
    }

    /// Drop the errors attached to an operation.
    pub(crate) fn clear_errors_for(&self, operation_id: &OperationId) -> usize {
        let before = self.inner.errors.len();
        self.inner
            .errors
            .retain(|_, error| error.operation_id != *operation_id);
        before - self.inner.errors.len()
    }

    async fn send(
        &self,
        command: Command,
        rx: oneshot::Receiver<std::result::Result<bool, StoreError>>,
    ) -> Result<bool> {
        self.inner
            .commands
            .send(command)
            .await
            .map_err(|_| EngineError::Closed)?;
        let result = rx.await.map_err(|_| EngineError::Closed)?;
        Ok(result?)
    }
}

impl std::fmt::Debug for SyncStatusAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStatusAggregator")
            .field("errors", &self.inner.errors.len())
            .finish()
    }
}
