//! Error types for sync-client.

use sync_core::QueueError;
use sync_types::{OperationId, OperationStatus, ParseError};

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Operation not found.
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

    /// Payload could not be encoded or decoded.
    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted row holds a value we cannot decode.
    #[error("corrupt row: {0}")]
    CorruptRow(#[from] ParseError),
}

impl From<QueueError> for StoreError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::NotFound(id) => StoreError::NotFound(id),
            QueueError::InvalidTransition { id, from, to } => {
                StoreError::InvalidTransition { id, from, to }
            }
        }
    }
}

/// Engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The engine has shut down and no longer accepts commands.
    #[error("sync engine is shut down")]
    Closed,
}

/// Result type alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
