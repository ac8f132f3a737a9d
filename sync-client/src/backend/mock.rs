//! Mock backend for testing.
//!
//! An in-memory document store with optimistic versioning. Failures can be
//! scripted and every applied operation is captured for verification.

use super::RemoteBackend;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use sync_types::{
    EntityRef, ExecutionFailure, OperationType, RemoteField, RemoteState, SyncOperation, Timestamp,
};

/// A document held by the mock remote.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MockRecord {
    /// Bumped on every write, including deletes.
    pub version: u64,
    /// Current fields with their last-modified times.
    pub fields: BTreeMap<String, RemoteField>,
    /// The record was deleted (the version survives).
    pub deleted: bool,
}

impl MockRecord {
    /// Current value of a field.
    pub fn value(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field).map(|f| &f.value)
    }

    fn remote_state(&self) -> RemoteState {
        RemoteState {
            version: self.version,
            fields: self.fields.clone(),
        }
    }
}

/// Mock backend for testing.
///
/// Clones share the same remote state.
#[derive(Debug, Default, Clone)]
pub struct MockBackend {
    inner: Arc<Mutex<MockBackendInner>>,
}

#[derive(Debug, Default)]
struct MockBackendInner {
    records: HashMap<EntityRef, MockRecord>,
    applied: Vec<SyncOperation>,
    calls: usize,
    latency: Duration,
    fail_next: VecDeque<ExecutionFailure>,
    fail_next_for: HashMap<EntityRef, VecDeque<ExecutionFailure>>,
}

impl MockBackend {
    /// Create an empty mock remote.
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, MockBackendInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay every call by `latency` before it is applied.
    pub fn set_latency(&self, latency: Duration) {
        self.inner().latency = latency;
    }

    /// Cause the next call (any entity) to fail with `failure`.
    ///
    /// Calls queue up: scripting twice fails the next two calls.
    pub fn fail_next(&self, failure: ExecutionFailure) {
        self.inner().fail_next.push_back(failure);
    }

    /// Cause the next `times` calls (any entity) to fail with `failure`.
    pub fn fail_times(&self, failure: ExecutionFailure, times: usize) {
        let mut inner = self.inner();
        for _ in 0..times {
            inner.fail_next.push_back(failure.clone());
        }
    }

    /// Cause the next call on `entity` to fail with `failure`.
    pub fn fail_next_for(&self, entity: &EntityRef, failure: ExecutionFailure) {
        self.inner()
            .fail_next_for
            .entry(entity.clone())
            .or_default()
            .push_back(failure);
    }

    /// Write a field as if another client changed it remotely.
    ///
    /// Bumps the record version.
    pub fn write_remote(
        &self,
        entity: &EntityRef,
        field: &str,
        value: serde_json::Value,
        modified_at: Timestamp,
    ) {
        let mut inner = self.inner();
        let record = inner.records.entry(entity.clone()).or_default();
        record.version += 1;
        record.deleted = false;
        record
            .fields
            .insert(field.to_string(), RemoteField { value, modified_at });
    }

    /// Current remote record.
    pub fn record(&self, entity: &EntityRef) -> Option<MockRecord> {
        self.inner().records.get(entity).cloned()
    }

    /// Current remote value of one field.
    pub fn value(&self, entity: &EntityRef, field: &str) -> Option<serde_json::Value> {
        self.inner()
            .records
            .get(entity)
            .and_then(|r| r.value(field).cloned())
    }

    /// Every operation applied so far, in apply order.
    pub fn applied(&self) -> Vec<SyncOperation> {
        self.inner().applied.clone()
    }

    /// Number of `execute` calls, including failed ones.
    pub fn calls(&self) -> usize {
        self.inner().calls
    }

    /// Clear all state (records, scripts, captured calls).
    pub fn reset(&self) {
        *self.inner() = MockBackendInner::default();
    }
}

#[async_trait]
impl RemoteBackend for MockBackend {
    async fn execute(&self, op: &SyncOperation) -> Result<u64, ExecutionFailure> {
        let latency = self.inner().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.inner();
        inner.calls += 1;

        // Check for forced failure
        if let Some(failure) = inner
            .fail_next_for
            .get_mut(&op.entity)
            .and_then(VecDeque::pop_front)
        {
            return Err(failure);
        }
        if let Some(failure) = inner.fail_next.pop_front() {
            return Err(failure);
        }

        let record = inner.records.entry(op.entity.clone()).or_default();
        if let Some(base) = op.base_version {
            if base != record.version {
                return Err(ExecutionFailure::Conflict(record.remote_state()));
            }
        }

        match op.op_type {
            OperationType::Create => {
                record.fields.clear();
                record.deleted = false;
                apply_fields(record, op);
            }
            OperationType::Update => {
                record.deleted = false;
                apply_fields(record, op);
            }
            OperationType::Delete => {
                record.fields.clear();
                record.deleted = true;
            }
        }
        record.version += 1;
        let version = record.version;

        inner.applied.push(op.clone());
        Ok(version)
    }
}

/// Fields are stamped with the time the edit was made locally.
fn apply_fields(record: &mut MockRecord, op: &SyncOperation) {
    for (name, value) in &op.payload {
        record.fields.insert(
            name.clone(),
            RemoteField {
                value: value.clone(),
                modified_at: op.created_at,
            },
        );
    }
}
