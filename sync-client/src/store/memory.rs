//! In-memory operation store.
//!
//! Wraps [`OperationQueue`] behind an async mutex. Not durable; used by
//! tests and by hosts that persist elsewhere.

use super::OperationStore;
use crate::error::StoreError;
use async_trait::async_trait;
use std::sync::Arc;
use sync_core::OperationQueue;
use sync_types::{EntityRef, NewOperation, OperationId, Payload, SyncOperation, Timestamp};
use tokio::sync::Mutex;

/// Memory-backed operation store.
///
/// Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    queue: Arc<Mutex<OperationQueue>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(OperationQueue::new())),
        }
    }

    /// Create a store pre-populated with operations (e.g. a snapshot).
    pub fn with_operations(operations: impl IntoIterator<Item = SyncOperation>) -> Self {
        Self {
            queue: Arc::new(Mutex::new(OperationQueue::from_operations(operations))),
        }
    }
}

#[async_trait]
impl OperationStore for MemoryStore {
    async fn enqueue(&self, new: NewOperation) -> Result<OperationId, StoreError> {
        let mut queue = self.queue.lock().await;
        Ok(queue.enqueue(new, Timestamp::now()).id)
    }

    async fn get(&self, id: &OperationId) -> Result<Option<SyncOperation>, StoreError> {
        Ok(self.queue.lock().await.get(id).cloned())
    }

    async fn list_pending(&self) -> Result<Vec<SyncOperation>, StoreError> {
        Ok(self.queue.lock().await.list_pending())
    }

    async fn list_entity(&self, entity: &EntityRef) -> Result<Vec<SyncOperation>, StoreError> {
        Ok(self.queue.lock().await.list_entity(entity))
    }

    async fn mark_in_flight(
        &self,
        id: &OperationId,
        now: Timestamp,
    ) -> Result<SyncOperation, StoreError> {
        Ok(self.queue.lock().await.mark_in_flight(id, now)?)
    }

    async fn mark_succeeded(&self, id: &OperationId) -> Result<SyncOperation, StoreError> {
        Ok(self.queue.lock().await.mark_succeeded(id)?)
    }

    async fn mark_failed(
        &self,
        id: &OperationId,
        retryable: bool,
        next_attempt_at: Option<Timestamp>,
    ) -> Result<SyncOperation, StoreError> {
        Ok(self
            .queue
            .lock()
            .await
            .mark_failed(id, retryable, next_attempt_at)?)
    }

    async fn return_to_pending(&self, id: &OperationId) -> Result<SyncOperation, StoreError> {
        Ok(self.queue.lock().await.return_to_pending(id)?)
    }

    async fn reset_for_retry(&self, id: &OperationId) -> Result<SyncOperation, StoreError> {
        Ok(self.queue.lock().await.reset_for_retry(id)?)
    }

    async fn apply_resolution(
        &self,
        id: &OperationId,
        payload: Payload,
        base_version: u64,
    ) -> Result<SyncOperation, StoreError> {
        Ok(self
            .queue
            .lock()
            .await
            .apply_resolution(id, payload, base_version)?)
    }

    async fn rebase_lane(
        &self,
        entity: &EntityRef,
        from: u64,
        to: u64,
    ) -> Result<u64, StoreError> {
        Ok(self.queue.lock().await.rebase_entity(entity, from, to) as u64)
    }

    async fn remove(&self, id: &OperationId) -> Result<Option<SyncOperation>, StoreError> {
        Ok(self.queue.lock().await.remove(id))
    }

    async fn recover_interrupted(&self) -> Result<u64, StoreError> {
        Ok(self.queue.lock().await.recover_interrupted() as u64)
    }
}
