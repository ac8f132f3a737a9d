//! Operation store.
//!
//! The store is the single source of truth for queued operations. It owns
//! every operation from enqueue until it succeeds (purged) or is dismissed.
//!
//! All mutating calls are atomic per operation id; there are no
//! cross-operation transactions. Lifecycle rules are those of
//! [`sync_core::OperationQueue`]: illegal transitions fail with
//! [`StoreError::InvalidTransition`], and a retryable failure that spends
//! the last retry leaves the operation `FailedTerminal`.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use async_trait::async_trait;
use sync_types::{EntityRef, NewOperation, OperationId, Payload, SyncOperation, Timestamp};

/// Trait for operation store backends.
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Persist a new operation as `Pending` and return its id.
    ///
    /// Never rejects on the basis of a duplicate target.
    async fn enqueue(&self, new: NewOperation) -> Result<OperationId, StoreError>;

    /// Look up one operation.
    async fn get(&self, id: &OperationId) -> Result<Option<SyncOperation>, StoreError>;

    /// All retained operations (any status), in creation order.
    ///
    /// A persisted store may leave out rows it cannot decode; `get` and
    /// `list_entity` still report them.
    async fn list_pending(&self) -> Result<Vec<SyncOperation>, StoreError>;

    /// Operations targeting one entity, in creation order.
    async fn list_entity(&self, entity: &EntityRef) -> Result<Vec<SyncOperation>, StoreError>;

    /// Start an attempt (`Pending`/`FailedRetryable` -> `InFlight`).
    async fn mark_in_flight(
        &self,
        id: &OperationId,
        now: Timestamp,
    ) -> Result<SyncOperation, StoreError>;

    /// The attempt applied; purge the operation and return it.
    async fn mark_succeeded(&self, id: &OperationId) -> Result<SyncOperation, StoreError>;

    /// The attempt failed. Returns the updated operation, whose status tells
    /// whether it is still retryable.
    async fn mark_failed(
        &self,
        id: &OperationId,
        retryable: bool,
        next_attempt_at: Option<Timestamp>,
    ) -> Result<SyncOperation, StoreError>;

    /// The attempt was interrupted; back to `Pending` without penalty.
    async fn return_to_pending(&self, id: &OperationId) -> Result<SyncOperation, StoreError>;

    /// Explicit retry: back to `Pending` with `retry_count` reset to 0.
    async fn reset_for_retry(&self, id: &OperationId) -> Result<SyncOperation, StoreError>;

    /// Replace the payload of an in-flight operation after conflict
    /// resolution.
    async fn apply_resolution(
        &self,
        id: &OperationId,
        payload: Payload,
        base_version: u64,
    ) -> Result<SyncOperation, StoreError>;

    /// One of the entity's writes advanced the remote record from `from`
    /// to `to`: move its queued operations still based on `from` onto `to`,
    /// so a lane never conflicts with its own earlier write.
    ///
    /// Returns the number rebased.
    async fn rebase_lane(
        &self,
        entity: &EntityRef,
        from: u64,
        to: u64,
    ) -> Result<u64, StoreError>;

    /// Remove an operation regardless of status.
    async fn remove(&self, id: &OperationId) -> Result<Option<SyncOperation>, StoreError>;

    /// Return operations left `InFlight` by a previous process to `Pending`.
    ///
    /// Returns the number recovered.
    async fn recover_interrupted(&self) -> Result<u64, StoreError>;
}
