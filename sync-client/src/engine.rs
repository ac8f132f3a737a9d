//! Sync engine.
//!
//! [`SyncEngine`] wires an operation store, a remote backend and a
//! connectivity signal into a running outbox:
//!
//! - the retry executor's background loop,
//! - the status aggregator,
//! - a command loop that applies `retry_operation` / `dismiss_operation`
//!   requests to the store.
//!
//! The engine is constructed explicitly and torn down with
//! [`SyncEngine::shutdown`], which returns in-flight operations to pending.

use crate::backend::RemoteBackend;
use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::error::{Result, StoreError};
use crate::executor::{shutdown_signalled, DrainReport, RetryExecutor};
use crate::status::{Command, SyncStatusAggregator};
use crate::store::OperationStore;
use std::sync::Arc;
use sync_types::{NewOperation, OperationId, OperationStatus, SyncStatus};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Capacity of the command channel.
const COMMAND_BUFFER: usize = 32;

/// A running outbox.
pub struct SyncEngine {
    store: Arc<dyn OperationStore>,
    executor: RetryExecutor,
    aggregator: SyncStatusAggregator,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncEngine {
    /// Start an engine with its background executor.
    ///
    /// Operations left in flight by a previous process are returned to
    /// pending first.
    pub async fn start(
        config: &Config,
        store: Arc<dyn OperationStore>,
        backend: Arc<dyn RemoteBackend>,
        connectivity: Connectivity,
    ) -> Result<Self> {
        let mut engine = Self::open(config, store, backend, connectivity).await?;
        let executor = engine.executor.clone();
        engine.tasks.push(tokio::spawn(executor.run()));
        Ok(engine)
    }

    /// Open an engine without the background executor.
    ///
    /// Nothing is sent to the backend until [`SyncEngine::sync_now`] is
    /// called. Used by one-shot tools.
    pub async fn open(
        config: &Config,
        store: Arc<dyn OperationStore>,
        backend: Arc<dyn RemoteBackend>,
        connectivity: Connectivity,
    ) -> Result<Self> {
        let recovered = store.recover_interrupted().await?;
        if recovered > 0 {
            tracing::info!("Recovered {} interrupted operations", recovered);
        }

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let aggregator = SyncStatusAggregator::new(Arc::clone(&store), commands_tx);
        let executor = RetryExecutor::new(
            Arc::clone(&store),
            backend,
            aggregator.clone(),
            connectivity,
            &config.executor,
            config.retry_policy(),
            shutdown_rx.clone(),
        );

        let status = aggregator.refresh().await?;
        tracing::info!(
            "Sync engine started ({} operations queued)",
            status.pending_count()
        );

        let commands = CommandHandler {
            store: Arc::clone(&store),
            aggregator: aggregator.clone(),
            executor: executor.clone(),
        };
        let command_task = tokio::spawn(commands.run(commands_rx, shutdown_rx));

        Ok(Self {
            store,
            executor,
            aggregator,
            shutdown,
            tasks: vec![command_task],
        })
    }

    /// Queue a mutation. Never rejects duplicates of a queued target.
    pub async fn enqueue(&self, new: NewOperation) -> Result<OperationId> {
        let id = self.store.enqueue(new).await?;
        tracing::debug!("Enqueued {}", id);
        self.aggregator.refresh().await?;
        self.executor.wake();
        Ok(id)
    }

    /// Latest status snapshot.
    pub fn status(&self) -> SyncStatus {
        self.aggregator.current()
    }

    /// Subscribe to status updates.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.aggregator.subscribe()
    }

    /// The status aggregator (retry, dismiss, clear errors).
    pub fn aggregator(&self) -> &SyncStatusAggregator {
        &self.aggregator
    }

    /// The operation store.
    pub fn store(&self) -> &Arc<dyn OperationStore> {
        &self.store
    }

    /// Drain the outbox now and wait for every lane to stop.
    pub async fn sync_now(&self) -> Result<DrainReport> {
        Ok(self.executor.drain().await?)
    }

    /// Stop background work and wait for it to finish.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.send_replace(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!("Engine task ended abnormally: {}", e);
            }
        }
        tracing::info!("Sync engine stopped");
        Ok(())
    }
}

/// Applies aggregator commands to the store.
struct CommandHandler {
    store: Arc<dyn OperationStore>,
    aggregator: SyncStatusAggregator,
    executor: RetryExecutor,
}

impl CommandHandler {
    async fn run(self, mut commands: mpsc::Receiver<Command>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                command = commands.recv() => match command {
                    Some(Command::Retry { id, reply }) => {
                        let _ = reply.send(self.retry(&id).await);
                    }
                    Some(Command::Dismiss { id, reply }) => {
                        let _ = reply.send(self.dismiss(&id).await);
                    }
                    None => break,
                },
            }
        }
    }

    /// Whether the operation is still queued and not in flight.
    async fn settled(&self, id: &OperationId) -> std::result::Result<bool, StoreError> {
        Ok(match self.store.get(id).await? {
            Some(op) => op.status != OperationStatus::InFlight,
            None => false,
        })
    }

    async fn retry(&self, id: &OperationId) -> std::result::Result<bool, StoreError> {
        if !self.settled(id).await? {
            tracing::debug!("Retry of {} ignored: not queued or in flight", id);
            return Ok(false);
        }

        match self.store.reset_for_retry(id).await {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) | Err(StoreError::InvalidTransition { .. }) => {
                return Ok(false)
            }
            Err(e) => return Err(e),
        }

        self.aggregator.clear_errors_for(id);
        self.aggregator.refresh().await?;
        self.executor.wake();
        tracing::info!("Operation {} queued for retry", id);
        Ok(true)
    }

    async fn dismiss(&self, id: &OperationId) -> std::result::Result<bool, StoreError> {
        if !self.settled(id).await? {
            tracing::debug!("Dismiss of {} ignored: not queued or in flight", id);
            return Ok(false);
        }

        if self.store.remove(id).await?.is_none() {
            return Ok(false);
        }

        self.aggregator.clear_errors_for(id);
        self.aggregator.refresh().await?;
        // The lane behind it may be unblocked now
        self.executor.wake();
        tracing::info!("Operation {} dismissed", id);
        Ok(true)
    }
}
