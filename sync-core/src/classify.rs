//! Error classification.
//!
//! Maps a raw [`ExecutionFailure`] to an [`ErrorKind`], a retryable flag and
//! the recovery text shown to the user. Pure and total: every failure gets a
//! classification, unknown causes fall through to a non-retryable default.

use sync_types::{ErrorKind, ExecutionFailure, OperationId, SyncError};

/// Recovery text for transient failures.
pub const RECOVERY_TRANSIENT: &str = "Will retry automatically when online";
/// Recovery text for version conflicts.
pub const RECOVERY_CONFLICT: &str = "Resolving conflicting changes";
/// Recovery text for authorization failures.
pub const RECOVERY_AUTHORIZATION: &str = "Sign in again to continue syncing";
/// Recovery text for validation failures.
pub const RECOVERY_VALIDATION: &str = "This change cannot be saved; please edit and retry";
/// Recovery text for anything else.
pub const RECOVERY_UNKNOWN: &str = "Something went wrong; contact support";

/// Result of classifying a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Error category.
    pub kind: ErrorKind,
    /// Whether the executor may try again on its own.
    pub retryable: bool,
    /// User-facing recovery text.
    pub recovery_suggestion: &'static str,
}

impl Classification {
    /// Build the user-visible error for a failed operation.
    pub fn to_sync_error(&self, operation_id: OperationId, failure: &ExecutionFailure) -> SyncError {
        SyncError::new(
            operation_id,
            self.kind,
            failure.to_string(),
            Some(self.recovery_suggestion.to_string()),
            self.retryable,
        )
    }
}

/// Classify a failure.
pub fn classify(failure: &ExecutionFailure) -> Classification {
    match failure {
        ExecutionFailure::Unreachable(_) | ExecutionFailure::Timeout => Classification {
            kind: ErrorKind::Transient,
            retryable: true,
            recovery_suggestion: RECOVERY_TRANSIENT,
        },
        ExecutionFailure::Conflict(_) => Classification {
            kind: ErrorKind::Conflict,
            retryable: true,
            recovery_suggestion: RECOVERY_CONFLICT,
        },
        ExecutionFailure::PermissionDenied(_) | ExecutionFailure::AuthExpired => Classification {
            kind: ErrorKind::Authorization,
            retryable: false,
            recovery_suggestion: RECOVERY_AUTHORIZATION,
        },
        ExecutionFailure::Validation(_) => Classification {
            kind: ErrorKind::Validation,
            retryable: false,
            recovery_suggestion: RECOVERY_VALIDATION,
        },
        ExecutionFailure::Other(_) => Classification {
            kind: ErrorKind::Unknown,
            retryable: false,
            recovery_suggestion: RECOVERY_UNKNOWN,
        },
    }
}
