//! Raw failures reported by a remote backend.

use crate::ids::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// One field of a remote record as seen at conflict time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteField {
    /// Current remote value.
    pub value: serde_json::Value,
    /// When the remote last wrote this field.
    pub modified_at: Timestamp,
}

/// The remote record reported alongside a version conflict.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RemoteState {
    /// Current remote version.
    pub version: u64,
    /// Remote fields with their last-modified times.
    pub fields: BTreeMap<String, RemoteField>,
}

impl RemoteState {
    /// Create an empty remote state at the given version.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            fields: BTreeMap::new(),
        }
    }

    /// Add a field.
    pub fn with_field(
        mut self,
        name: impl Into<String>,
        value: serde_json::Value,
        modified_at: Timestamp,
    ) -> Self {
        self.fields
            .insert(name.into(), RemoteField { value, modified_at });
        self
    }
}

/// Why a remote execution did not apply.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionFailure {
    /// The remote could not be reached.
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    /// The remote call timed out.
    #[error("remote call timed out")]
    Timeout,

    /// The remote version advanced past the operation's base version.
    #[error("remote version advanced to {}", .0.version)]
    Conflict(RemoteState),

    /// The caller lacks permission for this record.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The session expired.
    #[error("authorization expired")]
    AuthExpired,

    /// The payload failed remote validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Anything the backend could not categorize.
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conflict_display_names_version() {
        let failure = ExecutionFailure::Conflict(RemoteState::new(7));
        assert_eq!(failure.to_string(), "remote version advanced to 7");
    }

    #[test]
    fn remote_state_builder() {
        let state = RemoteState::new(2).with_field("name", json!("Z"), Timestamp::from_millis(5));
        assert_eq!(state.fields["name"].value, json!("Z"));
        assert_eq!(state.fields["name"].modified_at, Timestamp::from_millis(5));
    }

    #[test]
    fn failure_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ExecutionFailure>();
    }
}
