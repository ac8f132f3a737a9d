//! Queued mutations and their lifecycle states.

use crate::error::ParseError;
use crate::ids::{EntityRef, OperationId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum number of failed retryable attempts before an operation
/// becomes terminal.
pub const MAX_RETRY_COUNT: u32 = 3;

/// Field-level change set (update) or full record (create).
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Create a new record from the full payload.
    Create,
    /// Apply the payload's fields to an existing record.
    Update,
    /// Delete the record.
    Delete,
}

impl OperationType {
    /// Stable string form, used for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(ParseError::UnknownOperationType(other.to_string())),
        }
    }
}

/// Lifecycle state of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting to be executed.
    Pending,
    /// Currently being executed against the remote.
    InFlight,
    /// Applied remotely. Succeeded operations are purged, so this is only
    /// ever observed on a value returned from `mark_succeeded`.
    Succeeded,
    /// Failed, will be retried after its backoff.
    FailedRetryable,
    /// Failed, waits for an explicit retry or dismissal.
    FailedTerminal,
}

impl OperationStatus {
    /// Stable string form, used for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::FailedRetryable => "failed_retryable",
            Self::FailedTerminal => "failed_terminal",
        }
    }

    /// Whether an executor may start an attempt from this state.
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Self::Pending | Self::FailedRetryable)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "succeeded" => Ok(Self::Succeeded),
            "failed_retryable" => Ok(Self::FailedRetryable),
            "failed_terminal" => Ok(Self::FailedTerminal),
            other => Err(ParseError::UnknownStatus(other.to_string())),
        }
    }
}

/// A mutation requested by the caller, before the store assigns identity
/// and ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    /// Target record.
    pub entity: EntityRef,
    /// Kind of mutation.
    pub op_type: OperationType,
    /// Change set or full record.
    pub payload: Payload,
    /// Remote version this mutation was made against, if known.
    pub base_version: Option<u64>,
}

impl NewOperation {
    /// Create a record.
    pub fn create(entity: EntityRef, payload: Payload) -> Self {
        Self {
            entity,
            op_type: OperationType::Create,
            payload,
            base_version: None,
        }
    }

    /// Update fields of a record.
    pub fn update(entity: EntityRef, payload: Payload) -> Self {
        Self {
            entity,
            op_type: OperationType::Update,
            payload,
            base_version: None,
        }
    }

    /// Delete a record.
    pub fn delete(entity: EntityRef) -> Self {
        Self {
            entity,
            op_type: OperationType::Delete,
            payload: Payload::new(),
            base_version: None,
        }
    }

    /// Set the remote version the mutation assumes.
    pub fn with_base_version(mut self, version: u64) -> Self {
        self.base_version = Some(version);
        self
    }
}

/// A mutation owned by the operation store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Stable identifier.
    pub id: OperationId,
    /// Target record.
    pub entity: EntityRef,
    /// Kind of mutation.
    pub op_type: OperationType,
    /// Change set or full record.
    pub payload: Payload,
    /// Local enqueue time; defines intended apply order.
    pub created_at: Timestamp,
    /// Store-assigned sequence, breaks `created_at` ties.
    pub seq: u64,
    /// Failed retryable attempts so far, never above [`MAX_RETRY_COUNT`].
    pub retry_count: u32,
    /// Lifecycle state.
    pub status: OperationStatus,
    /// Most recent attempt.
    pub last_attempt_at: Option<Timestamp>,
    /// Earliest time the next attempt may start (set while `FailedRetryable`).
    pub next_attempt_at: Option<Timestamp>,
    /// Remote version this mutation assumes.
    pub base_version: Option<u64>,
    /// Conflict resolutions applied so far.
    pub conflict_count: u32,
}

impl SyncOperation {
    /// Build a pending operation from a caller request.
    pub fn from_new(new: NewOperation, id: OperationId, created_at: Timestamp, seq: u64) -> Self {
        Self {
            id,
            entity: new.entity,
            op_type: new.op_type,
            payload: new.payload,
            created_at,
            seq,
            retry_count: 0,
            status: OperationStatus::Pending,
            last_attempt_at: None,
            next_attempt_at: None,
            base_version: new.base_version,
            conflict_count: 0,
        }
    }

    /// Ordering key within the store.
    pub fn order_key(&self) -> (Timestamp, u64) {
        (self.created_at, self.seq)
    }

    /// Whether the retry budget is spent.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= MAX_RETRY_COUNT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            OperationStatus::Pending,
            OperationStatus::InFlight,
            OperationStatus::Succeeded,
            OperationStatus::FailedRetryable,
            OperationStatus::FailedTerminal,
        ] {
            assert_eq!(status.as_str().parse::<OperationStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_fails() {
        assert!(matches!(
            "paused".parse::<OperationStatus>(),
            Err(ParseError::UnknownStatus(_))
        ));
    }

    #[test]
    fn operation_type_parses() {
        assert_eq!("update".parse::<OperationType>().unwrap(), OperationType::Update);
        assert!("upsert".parse::<OperationType>().is_err());
    }

    #[test]
    fn only_pending_and_retryable_are_dispatchable() {
        assert!(OperationStatus::Pending.is_dispatchable());
        assert!(OperationStatus::FailedRetryable.is_dispatchable());
        assert!(!OperationStatus::InFlight.is_dispatchable());
        assert!(!OperationStatus::FailedTerminal.is_dispatchable());
        assert!(!OperationStatus::Succeeded.is_dispatchable());
    }

    #[test]
    fn from_new_starts_pending_with_zero_retries() {
        let new = NewOperation::update(
            EntityRef::new("profile", "x"),
            payload(json!({"name": "A"})),
        )
        .with_base_version(4);
        let op = SyncOperation::from_new(new, OperationId::new(), Timestamp::from_millis(10), 1);

        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert_eq!(op.conflict_count, 0);
        assert_eq!(op.base_version, Some(4));
        assert!(op.last_attempt_at.is_none());
        assert!(!op.retries_exhausted());
    }

    #[test]
    fn delete_has_empty_payload() {
        let new = NewOperation::delete(EntityRef::new("log", "7"));
        assert_eq!(new.op_type, OperationType::Delete);
        assert!(new.payload.is_empty());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&OperationStatus::FailedTerminal).unwrap();
        assert_eq!(json, "\"failed_terminal\"");
    }
}
