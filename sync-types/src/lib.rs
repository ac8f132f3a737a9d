//! # sync-types
//!
//! Data model for the offline outbox.
//!
//! This crate provides the foundational types used across all outbox crates:
//! - [`OperationId`], [`SyncErrorId`], [`EntityRef`], [`Timestamp`] - Identity and ordering types
//! - [`SyncOperation`], [`NewOperation`] - Queued mutations and their lifecycle
//! - [`ExecutionFailure`], [`RemoteState`] - What a remote backend reports
//! - [`SyncError`], [`SyncStatus`] - What a UI observes

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod failure;
mod ids;
mod operation;
mod status;

pub use error::ParseError;
pub use failure::{ExecutionFailure, RemoteField, RemoteState};
pub use ids::{EntityRef, OperationId, SyncErrorId, Timestamp};
pub use operation::{
    NewOperation, OperationStatus, OperationType, Payload, SyncOperation, MAX_RETRY_COUNT,
};
pub use status::{ErrorKind, SyncError, SyncStatus};
