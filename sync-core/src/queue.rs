//! In-memory operation queue.
//!
//! This module provides the ordered outbox with:
//! - Creation ordering (`created_at`, then store sequence)
//! - Lifecycle transitions validated per operation
//! - The retry budget enforced at the point of failure
//!
//! The queue is the authoritative model of the store contract. The
//! memory-backed store in sync-client wraps it directly; the SQLite store
//! mirrors its transitions in SQL.
//!
//! Operations flow through the queue in this order:
//! 1. `enqueue()` - add as `Pending`
//! 2. `mark_in_flight()` - an attempt starts
//! 3. `mark_succeeded()` - purge, or `mark_failed()` / `return_to_pending()`
//!
//! Terminal operations stay until `reset_for_retry()` or `remove()`.

use std::collections::{BTreeMap, HashMap};
use sync_types::{
    EntityRef, NewOperation, OperationId, OperationStatus, Payload, SyncOperation, Timestamp,
    MAX_RETRY_COUNT,
};
use thiserror::Error;

/// Error type for queue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// No operation with this id is queued.
    #[error("operation not found: {0}")]
    NotFound(OperationId),

    /// The requested transition is not allowed from the current status.
    #[error("operation {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The operation.
        id: OperationId,
        /// Current status.
        from: OperationStatus,
        /// Requested status.
        to: OperationStatus,
    },
}

/// Check a lifecycle transition.
///
/// Removal (dismissal) is always allowed and is not modelled here.
pub fn check_transition(
    id: OperationId,
    from: OperationStatus,
    to: OperationStatus,
) -> Result<(), QueueError> {
    use OperationStatus::*;
    let allowed = matches!(
        (from, to),
        (Pending | FailedRetryable, InFlight)
            | (InFlight, Succeeded | FailedRetryable | FailedTerminal | Pending)
            | (Pending | FailedRetryable | FailedTerminal, Pending)
    );
    if allowed {
        Ok(())
    } else {
        Err(QueueError::InvalidTransition { id, from, to })
    }
}

/// Move an operation to `InFlight` and stamp the attempt time.
pub fn start_attempt(op: &mut SyncOperation, now: Timestamp) -> Result<(), QueueError> {
    check_transition(op.id, op.status, OperationStatus::InFlight)?;
    op.status = OperationStatus::InFlight;
    op.last_attempt_at = Some(now);
    op.next_attempt_at = None;
    Ok(())
}

/// Mark an in-flight operation as applied.
pub fn complete_attempt(op: &mut SyncOperation) -> Result<(), QueueError> {
    check_transition(op.id, op.status, OperationStatus::Succeeded)?;
    op.status = OperationStatus::Succeeded;
    Ok(())
}

/// Record a failed attempt.
///
/// A retryable failure spends one retry; once the budget is spent the
/// operation becomes terminal instead. `next_attempt_at` is only kept
/// for operations left `FailedRetryable`.
pub fn fail_attempt(
    op: &mut SyncOperation,
    retryable: bool,
    next_attempt_at: Option<Timestamp>,
) -> Result<(), QueueError> {
    check_transition(op.id, op.status, OperationStatus::FailedTerminal)?;

    if retryable {
        op.retry_count = (op.retry_count + 1).min(MAX_RETRY_COUNT);
    }
    if retryable && !op.retries_exhausted() {
        op.status = OperationStatus::FailedRetryable;
        op.next_attempt_at = next_attempt_at;
    } else {
        op.status = OperationStatus::FailedTerminal;
        op.next_attempt_at = None;
    }
    Ok(())
}

/// Return an interrupted attempt to `Pending`, keeping its retry count.
pub fn interrupt_attempt(op: &mut SyncOperation) -> Result<(), QueueError> {
    if op.status != OperationStatus::InFlight {
        return Err(QueueError::InvalidTransition {
            id: op.id,
            from: op.status,
            to: OperationStatus::Pending,
        });
    }
    op.status = OperationStatus::Pending;
    Ok(())
}

/// Back to `Pending` with a fresh retry budget. Rejects in-flight
/// operations.
pub fn reset_retries(op: &mut SyncOperation) -> Result<(), QueueError> {
    if op.status == OperationStatus::InFlight {
        return Err(QueueError::InvalidTransition {
            id: op.id,
            from: op.status,
            to: OperationStatus::Pending,
        });
    }
    check_transition(op.id, op.status, OperationStatus::Pending)?;
    op.status = OperationStatus::Pending;
    op.retry_count = 0;
    op.conflict_count = 0;
    op.next_attempt_at = None;
    Ok(())
}

/// Swap in a conflict-resolved payload on an in-flight operation.
pub fn replace_payload(
    op: &mut SyncOperation,
    payload: Payload,
    base_version: u64,
) -> Result<(), QueueError> {
    if op.status != OperationStatus::InFlight {
        return Err(QueueError::InvalidTransition {
            id: op.id,
            from: op.status,
            to: OperationStatus::InFlight,
        });
    }
    op.payload = payload;
    op.base_version = Some(base_version);
    op.conflict_count += 1;
    Ok(())
}

/// Ordered outbox of operations.
#[derive(Debug, Default)]
pub struct OperationQueue {
    /// Creation order -> id.
    order: BTreeMap<(Timestamp, u64), OperationId>,
    /// Operations by id.
    operations: HashMap<OperationId, SyncOperation>,
    /// Next sequence number to assign.
    next_seq: u64,
    /// Latest `created_at` handed out.
    last_created_at: Timestamp,
}

impl OperationQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            ..Self::default()
        }
    }

    /// Rebuild a queue from previously persisted operations.
    pub fn from_operations(operations: impl IntoIterator<Item = SyncOperation>) -> Self {
        let mut queue = Self::new();
        for op in operations {
            queue.next_seq = queue.next_seq.max(op.seq + 1);
            queue.last_created_at = queue.last_created_at.max(op.created_at);
            queue.order.insert(op.order_key(), op.id);
            queue.operations.insert(op.id, op);
        }
        queue
    }

    /// Add a new operation as `Pending` and return it.
    ///
    /// `created_at` never goes backwards, so creation order equals enqueue
    /// order even if the wall clock steps back.
    pub fn enqueue(&mut self, new: NewOperation, now: Timestamp) -> SyncOperation {
        let created_at = now.max(self.last_created_at);
        self.last_created_at = created_at;
        let seq = self.next_seq;
        self.next_seq += 1;

        let op = SyncOperation::from_new(new, OperationId::new(), created_at, seq);
        self.order.insert(op.order_key(), op.id);
        self.operations.insert(op.id, op.clone());
        op
    }

    /// Look up an operation.
    pub fn get(&self, id: &OperationId) -> Option<&SyncOperation> {
        self.operations.get(id)
    }

    /// All retained operations in creation order.
    pub fn list_pending(&self) -> Vec<SyncOperation> {
        self.order
            .values()
            .filter_map(|id| self.operations.get(id))
            .cloned()
            .collect()
    }

    /// Operations targeting one entity, in creation order.
    pub fn list_entity(&self, entity: &EntityRef) -> Vec<SyncOperation> {
        self.order
            .values()
            .filter_map(|id| self.operations.get(id))
            .filter(|op| op.entity == *entity)
            .cloned()
            .collect()
    }

    /// Start an attempt.
    pub fn mark_in_flight(
        &mut self,
        id: &OperationId,
        now: Timestamp,
    ) -> Result<SyncOperation, QueueError> {
        let op = self.get_mut(id)?;
        start_attempt(op, now)?;
        Ok(op.clone())
    }

    /// The attempt applied: purge the operation and return it.
    pub fn mark_succeeded(&mut self, id: &OperationId) -> Result<SyncOperation, QueueError> {
        complete_attempt(self.get_mut(id)?)?;
        self.remove(id).ok_or(QueueError::NotFound(*id))
    }

    /// The attempt failed. See [`fail_attempt`].
    pub fn mark_failed(
        &mut self,
        id: &OperationId,
        retryable: bool,
        next_attempt_at: Option<Timestamp>,
    ) -> Result<SyncOperation, QueueError> {
        let op = self.get_mut(id)?;
        fail_attempt(op, retryable, next_attempt_at)?;
        Ok(op.clone())
    }

    /// An attempt was interrupted (connectivity lost, shutdown).
    ///
    /// The operation goes back to `Pending` without spending a retry.
    pub fn return_to_pending(&mut self, id: &OperationId) -> Result<SyncOperation, QueueError> {
        let op = self.get_mut(id)?;
        interrupt_attempt(op)?;
        Ok(op.clone())
    }

    /// Explicit user retry: back to `Pending` with a fresh retry budget.
    pub fn reset_for_retry(&mut self, id: &OperationId) -> Result<SyncOperation, QueueError> {
        let op = self.get_mut(id)?;
        reset_retries(op)?;
        Ok(op.clone())
    }

    /// Replace the payload of an in-flight operation after conflict
    /// resolution.
    pub fn apply_resolution(
        &mut self,
        id: &OperationId,
        payload: Payload,
        base_version: u64,
    ) -> Result<SyncOperation, QueueError> {
        let op = self.get_mut(id)?;
        replace_payload(op, payload, base_version)?;
        Ok(op.clone())
    }

    /// Move an entity's queued operations from `from` to `to` after one of
    /// its own writes advanced the remote version.
    ///
    /// Only operations still based on `from` move; an in-flight operation is
    /// left alone. Returns how many were rebased.
    pub fn rebase_entity(&mut self, entity: &EntityRef, from: u64, to: u64) -> usize {
        let mut rebased = 0;
        for op in self.operations.values_mut() {
            if op.entity == *entity
                && op.base_version == Some(from)
                && op.status != OperationStatus::InFlight
            {
                op.base_version = Some(to);
                rebased += 1;
            }
        }
        rebased
    }

    /// Remove an operation regardless of status.
    pub fn remove(&mut self, id: &OperationId) -> Option<SyncOperation> {
        let op = self.operations.remove(id)?;
        self.order.remove(&op.order_key());
        Some(op)
    }

    /// Move every in-flight operation back to `Pending`.
    ///
    /// Used at startup: an attempt that was running when the process died
    /// did not fail, it was interrupted. Returns how many were recovered.
    pub fn recover_interrupted(&mut self) -> usize {
        let mut recovered = 0;
        for op in self.operations.values_mut() {
            if op.status == OperationStatus::InFlight {
                op.status = OperationStatus::Pending;
                recovered += 1;
            }
        }
        recovered
    }

    /// Number of retained operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    fn get_mut(&mut self, id: &OperationId) -> Result<&mut SyncOperation, QueueError> {
        self.operations.get_mut(id).ok_or(QueueError::NotFound(*id))
    }
}
