//! User-visible sync errors and the derived sync status.

use crate::error::ParseError;
use crate::ids::{OperationId, SyncErrorId, Timestamp};
use crate::operation::{OperationStatus, SyncOperation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classification of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network unreachable or timed out. Retried automatically.
    Transient,
    /// Remote version advanced. Resolved once, then terminal.
    Conflict,
    /// Permission denied or session expired.
    Authorization,
    /// Payload rejected by remote validation.
    Validation,
    /// Anything else.
    Unknown,
}

impl ErrorKind {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Conflict => "conflict",
            Self::Authorization => "authorization",
            Self::Validation => "validation",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(Self::Transient),
            "conflict" => Ok(Self::Conflict),
            "authorization" => Ok(Self::Authorization),
            "validation" => Ok(Self::Validation),
            "unknown" => Ok(Self::Unknown),
            other => Err(ParseError::UnknownErrorKind(other.to_string())),
        }
    }
}

/// A terminal failure surfaced to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncError {
    /// Identifier used by `clear_sync_error`.
    pub id: SyncErrorId,
    /// The failed operation (back-reference only).
    pub operation_id: OperationId,
    /// Classification.
    pub kind: ErrorKind,
    /// Failure description.
    pub message: String,
    /// What the user can do about it.
    pub recovery_suggestion: Option<String>,
    /// Whether a manual retry can succeed without changing the payload.
    pub is_retryable: bool,
    /// When the failure was recorded.
    pub occurred_at: Timestamp,
}

impl SyncError {
    /// Create a new error for an operation, stamped now.
    pub fn new(
        operation_id: OperationId,
        kind: ErrorKind,
        message: impl Into<String>,
        recovery_suggestion: Option<String>,
        is_retryable: bool,
    ) -> Self {
        Self {
            id: SyncErrorId::new(),
            operation_id,
            kind,
            message: message.into(),
            recovery_suggestion,
            is_retryable,
            occurred_at: Timestamp::now(),
        }
    }
}

/// Snapshot of the outbox as seen by a UI or CLI.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    /// At least one operation is in flight.
    pub is_syncing: bool,
    /// Retained operations in creation order.
    pub pending_operations: Vec<SyncOperation>,
    /// Surfaced errors ordered by `occurred_at`.
    pub sync_errors: Vec<SyncError>,
}

impl SyncStatus {
    /// Derive a status from the store's operations and the error set.
    ///
    /// `operations` must already be in creation order.
    pub fn derive(operations: Vec<SyncOperation>, mut errors: Vec<SyncError>) -> Self {
        errors.sort_by_key(|e| (e.occurred_at, e.id));
        let is_syncing = operations
            .iter()
            .any(|op| op.status == OperationStatus::InFlight);
        Self {
            is_syncing,
            pending_operations: operations,
            sync_errors: errors,
        }
    }

    /// Any operation is still queued (including terminal ones).
    pub fn has_pending_operations(&self) -> bool {
        !self.pending_operations.is_empty()
    }

    /// Any error is surfaced.
    pub fn has_errors(&self) -> bool {
        !self.sync_errors.is_empty()
    }

    /// Number of queued operations.
    pub fn pending_count(&self) -> usize {
        self.pending_operations.len()
    }

    /// Look up a queued operation.
    pub fn operation(&self, id: &OperationId) -> Option<&SyncOperation> {
        self.pending_operations.iter().find(|op| op.id == *id)
    }

    /// Errors attached to an operation.
    pub fn errors_for(&self, id: &OperationId) -> impl Iterator<Item = &SyncError> {
        let id = *id;
        self.sync_errors
            .iter()
            .filter(move |e| e.operation_id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::EntityRef;
    use crate::operation::NewOperation;

    fn op(status: OperationStatus, seq: u64) -> SyncOperation {
        let mut op = SyncOperation::from_new(
            NewOperation::delete(EntityRef::new("log", seq.to_string())),
            OperationId::new(),
            Timestamp::from_millis(seq),
            seq,
        );
        op.status = status;
        op
    }

    #[test]
    fn empty_status() {
        let status = SyncStatus::default();
        assert!(!status.is_syncing);
        assert!(!status.has_pending_operations());
        assert!(!status.has_errors());
    }

    #[test]
    fn syncing_when_any_in_flight() {
        let status = SyncStatus::derive(
            vec![op(OperationStatus::Pending, 1), op(OperationStatus::InFlight, 2)],
            vec![],
        );
        assert!(status.is_syncing);
        assert_eq!(status.pending_count(), 2);
    }

    #[test]
    fn terminal_operations_count_as_pending() {
        let status = SyncStatus::derive(vec![op(OperationStatus::FailedTerminal, 1)], vec![]);
        assert!(!status.is_syncing);
        assert!(status.has_pending_operations());
    }

    #[test]
    fn errors_sorted_by_occurrence() {
        let target = OperationId::new();
        let mut late = SyncError::new(target, ErrorKind::Unknown, "late", None, false);
        late.occurred_at = Timestamp::from_millis(200);
        let mut early = SyncError::new(target, ErrorKind::Validation, "early", None, false);
        early.occurred_at = Timestamp::from_millis(100);

        let status = SyncStatus::derive(vec![], vec![late, early]);
        assert_eq!(status.sync_errors[0].message, "early");
        assert!(status.has_errors());
        assert_eq!(status.errors_for(&target).count(), 2);
    }

    #[test]
    fn error_kind_parses() {
        assert_eq!("conflict".parse::<ErrorKind>().unwrap(), ErrorKind::Conflict);
        assert!("fatal".parse::<ErrorKind>().is_err());
    }
}
