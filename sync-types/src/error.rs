//! Error types for the outbox data model.

use thiserror::Error;

/// Errors raised when decoding persisted or user-supplied values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Not a valid UUID.
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// Unknown operation type.
    #[error("unknown operation type: {0}")]
    UnknownOperationType(String),

    /// Unknown operation status.
    #[error("unknown operation status: {0}")]
    UnknownStatus(String),

    /// Unknown error kind.
    #[error("unknown error kind: {0}")]
    UnknownErrorKind(String),
}
