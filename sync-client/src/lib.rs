//! # sync-client
//!
//! Runtime for the offline outbox.
//!
//! Applications record mutations locally with [`SyncEngine::enqueue`]; the
//! engine replays them against a [`RemoteBackend`] whenever connectivity
//! allows, and publishes a [`SyncStatus`](sync_types::SyncStatus) a UI can
//! observe.
//!
//! ## Features
//!
//! - **Durable Outbox**: SQLite store survives restarts; in-memory store for tests
//! - **Ordered Lanes**: operations on one entity apply in enqueue order
//! - **Bounded Retry**: exponential backoff, three retries, then surfaced errors
//! - **Conflict Resolution**: field-level last-writer-wins via sync-core
//! - **Backend Abstraction**: pluggable remote (mock included)
//!
//! ## Example
//!
//! ```ignore
//! use outbox_sync_client::{connectivity, Config, MockBackend, SqliteStore, SyncEngine};
//!
//! let store = Arc::new(SqliteStore::new(Path::new("outbox.db")).await?);
//! let (network, watch) = connectivity(false);
//! let engine = SyncEngine::start(&Config::default(), store, backend, watch).await?;
//!
//! engine.enqueue(NewOperation::update(entity, payload)).await?;
//! network.set_online(true);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod executor;
pub mod status;
pub mod store;

pub use backend::{MockBackend, MockRecord, RemoteBackend};
pub use config::{Config, ConfigError, ExecutorConfig, RetryConfig, StorageConfig};
pub use connectivity::{connectivity, Connectivity, ConnectivityHandle};
pub use engine::SyncEngine;
pub use error::{EngineError, Result, StoreError, StoreResult};
pub use executor::{DrainReport, RetryExecutor};
pub use status::SyncStatusAggregator;
pub use store::{MemoryStore, OperationStore, SqliteStore};
