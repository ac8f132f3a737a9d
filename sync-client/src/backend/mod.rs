//! Remote backend abstraction.
//!
//! The executor hands one operation at a time to a [`RemoteBackend`] and
//! interprets the returned [`ExecutionFailure`]. Backends do not retry and do
//! not touch the operation store.
//!
//! # Example
//!
//! ```ignore
//! let backend = MockBackend::new();
//! backend.fail_next(ExecutionFailure::Timeout);
//! assert!(backend.execute(&op).await.is_err());
//! ```

mod mock;

pub use mock::{MockBackend, MockRecord};

use async_trait::async_trait;
use sync_types::{ExecutionFailure, SyncOperation};

/// Trait for the remote side of the outbox.
///
/// Implementations map their transport errors onto [`ExecutionFailure`]:
/// a stale `base_version` must be reported as
/// [`ExecutionFailure::Conflict`] carrying the remote record, so the
/// executor can resolve it.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Apply one operation remotely, returning the record's version after
    /// the write.
    ///
    /// The executor moves the lane's queued operations that shared this
    /// operation's `base_version` onto the returned version.
    ///
    /// May be cancelled at any await point when connectivity drops; an
    /// implementation must not report success for a cancelled call.
    async fn execute(&self, op: &SyncOperation) -> Result<u64, ExecutionFailure>;
}
