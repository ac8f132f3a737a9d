//! Conflict resolution.
//!
//! Invoked when the remote reports that its version advanced past the one
//! an operation assumed. Resolution is field-level last-writer-wins against
//! the remote's per-field modification times:
//!
//! - a field in the local payload is kept if the operation was created
//!   strictly after the remote last modified that field;
//! - otherwise the remote value stands and the field is dropped;
//! - fields the remote has never written are kept;
//! - fields absent from the local payload are never touched.
//!
//! The reduced payload is resubmitted once against the remote's version.

use sync_types::{OperationType, Payload, RemoteState, SyncOperation};

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Fields the local operation still wins.
    pub payload: Payload,
    /// Remote version to resubmit against.
    pub base_version: u64,
    /// Fields that deferred to the remote.
    pub deferred: Vec<String>,
    /// Kind of mutation being resolved.
    op_type: OperationType,
}

impl Resolution {
    /// Whether the remote already holds the winning state, so nothing is
    /// left to write.
    ///
    /// Deletes always resubmit.
    pub fn is_noop(&self) -> bool {
        self.op_type != OperationType::Delete && self.payload.is_empty()
    }
}

/// Resolve a conflict between a local operation and the remote record.
pub fn resolve(op: &SyncOperation, remote: &RemoteState) -> Resolution {
    let mut payload = Payload::new();
    let mut deferred = Vec::new();

    for (field, value) in &op.payload {
        let local_wins = remote
            .fields
            .get(field)
            .map_or(true, |remote_field| op.created_at > remote_field.modified_at);

        if local_wins {
            payload.insert(field.clone(), value.clone());
        } else {
            deferred.push(field.clone());
        }
    }

    Resolution {
        payload,
        base_version: remote.version,
        deferred,
        op_type: op.op_type,
    }
}
