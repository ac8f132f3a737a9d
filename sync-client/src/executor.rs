//! Retry executor.
//!
//! Drains the outbox against a [`RemoteBackend`]. Operations are grouped
//! into lanes by entity; each lane runs as its own task and executes its
//! operations strictly in creation order, while different lanes run
//! concurrently. A semaphore bounds the number of remote calls in flight.
//!
//! Per attempt:
//! 1. `mark_in_flight`, then call the backend, racing the call against
//!    connectivity loss and shutdown.
//! 2. Success purges the operation and moves the lane's queued operations
//!    that shared its `base_version` onto the version the write produced.
//! 3. A first conflict is resolved field by field and resubmitted once.
//! 4. Other failures are classified. Retryable ones back off
//!    (`base × 2^retry_count`) and retry; terminal ones surface a
//!    [`SyncError`](sync_types::SyncError) and block the lane.
//! 5. An interrupted call returns the operation to `Pending` untouched.
//!
//! A store error mid-attempt also hands the operation back to `Pending`
//! where it can. A lane that finds its head `InFlight` with no attempt
//! running recovers it, so one executor must own a store at a time.

use crate::backend::RemoteBackend;
use crate::config::ExecutorConfig;
use crate::connectivity::Connectivity;
use crate::error::StoreError;
use crate::status::SyncStatusAggregator;
use crate::store::OperationStore;
use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use sync_core::{classify, lane_state, plan_lanes, resolve, LaneState, RetryPolicy};
use sync_types::{
    EntityRef, ExecutionFailure, OperationId, OperationStatus, SyncOperation, Timestamp,
};
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinSet;

/// Summary of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Operations applied and purged.
    pub succeeded: usize,
    /// Retryable failures scheduled for another attempt.
    pub retried: usize,
    /// Operations that became `FailedTerminal`.
    pub failed_terminal: usize,
    /// Attempts cut short by connectivity loss or shutdown.
    pub interrupted: usize,
    /// Conflicts resolved by field-level merge.
    pub conflicts_resolved: usize,
    /// Lanes left waiting behind a terminal operation.
    pub blocked: Vec<EntityRef>,
}

impl DrainReport {
    fn merge(&mut self, other: DrainReport) {
        self.succeeded += other.succeeded;
        self.retried += other.retried;
        self.failed_terminal += other.failed_terminal;
        self.interrupted += other.interrupted;
        self.conflicts_resolved += other.conflicts_resolved;
        for entity in other.blocked {
            self.block(entity);
        }
    }

    fn block(&mut self, entity: EntityRef) {
        if !self.blocked.contains(&entity) {
            self.blocked.push(entity);
        }
    }

    /// Nothing happened.
    pub fn is_idle(&self) -> bool {
        self.succeeded == 0
            && self.retried == 0
            && self.failed_terminal == 0
            && self.interrupted == 0
    }
}

/// Whether a lane keeps going after an attempt.
enum Step {
    Continue,
    Stop,
}

/// Lane-serializing retry executor.
///
/// Clones share the same worker pool and lane registry.
#[derive(Clone)]
pub struct RetryExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    store: Arc<dyn OperationStore>,
    backend: Arc<dyn RemoteBackend>,
    aggregator: SyncStatusAggregator,
    connectivity: Connectivity,
    policy: RetryPolicy,
    poll_interval: Duration,
    workers: Semaphore,
    active_lanes: DashSet<EntityRef>,
    wake: Notify,
    lane_wake: Notify,
    shutdown: watch::Receiver<bool>,
}

/// Removes a lane from the active set when its task ends.
struct LaneGuard {
    inner: Arc<ExecutorInner>,
    entity: EntityRef,
}

impl Drop for LaneGuard {
    fn drop(&mut self) {
        self.inner.active_lanes.remove(&self.entity);
    }
}

impl RetryExecutor {
    /// Create an executor.
    pub(crate) fn new(
        store: Arc<dyn OperationStore>,
        backend: Arc<dyn RemoteBackend>,
        aggregator: SyncStatusAggregator,
        connectivity: Connectivity,
        config: &ExecutorConfig,
        policy: RetryPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                store,
                backend,
                aggregator,
                connectivity,
                policy,
                poll_interval: config.poll_interval(),
                workers: Semaphore::new(config.workers()),
                active_lanes: DashSet::new(),
                wake: Notify::new(),
                lane_wake: Notify::new(),
                shutdown,
            }),
        }
    }

    /// Ask the run loop to drain soon and lanes waiting on a backoff to
    /// re-read their head.
    pub fn wake(&self) {
        self.inner.wake.notify_one();
        self.inner.lane_wake.notify_waiters();
    }

    fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    fn can_run(&self) -> bool {
        !self.is_shutting_down() && self.inner.connectivity.is_online()
    }

    /// Drain every runnable lane and wait until all of them stop.
    ///
    /// Lanes stop when empty, blocked by a terminal operation, or
    /// interrupted. Lanes already run by another drain are skipped.
    pub async fn drain(&self) -> Result<DrainReport, StoreError> {
        let mut lanes = JoinSet::new();
        let mut report = self.dispatch(&mut lanes).await?;

        while let Some(joined) = lanes.join_next().await {
            match joined {
                Ok(lane_report) => report.merge(lane_report),
                Err(e) => tracing::error!("Lane task failed: {}", e),
            }
        }

        if !report.is_idle() {
            tracing::info!(
                "Drain finished: {} succeeded, {} retried, {} failed, {} interrupted, {} blocked lanes",
                report.succeeded,
                report.retried,
                report.failed_terminal,
                report.interrupted,
                report.blocked.len()
            );
        }
        Ok(report)
    }

    /// Spawn a task for every runnable lane not already active.
    ///
    /// Returns a report holding the lanes found blocked.
    async fn dispatch(&self, lanes: &mut JoinSet<DrainReport>) -> Result<DrainReport, StoreError> {
        let mut report = DrainReport::default();
        if !self.can_run() {
            return Ok(report);
        }

        let now = Timestamp::now();
        for lane in plan_lanes(self.inner.store.list_pending().await?) {
            match lane.state(now) {
                LaneState::Blocked { .. } => report.block(lane.entity),
                // Busy without an active lane task is an orphaned attempt
                LaneState::Ready | LaneState::Waiting { .. } | LaneState::Busy => {
                    if !self.inner.active_lanes.insert(lane.entity.clone()) {
                        continue;
                    }
                    let guard = LaneGuard {
                        inner: Arc::clone(&self.inner),
                        entity: lane.entity,
                    };
                    let executor = self.clone();
                    lanes.spawn(async move { executor.run_lane(guard).await });
                }
                LaneState::Empty => {}
            }
        }
        Ok(report)
    }

    /// Run one lane until it empties, blocks or is interrupted.
    async fn run_lane(&self, guard: LaneGuard) -> DrainReport {
        let entity = &guard.entity;
        let mut report = DrainReport::default();

        if let Err(e) = self.drive_lane(entity, &mut report).await {
            tracing::error!("Lane {} stopped on store error: {}", entity, e);
        }
        report
    }

    async fn drive_lane(
        &self,
        entity: &EntityRef,
        report: &mut DrainReport,
    ) -> Result<(), StoreError> {
        loop {
            if !self.can_run() {
                return Ok(());
            }

            let operations = self.inner.store.list_entity(entity).await?;
            let head = operations.first();
            match lane_state(head, Timestamp::now()) {
                LaneState::Empty => return Ok(()),
                LaneState::Busy => {
                    let Some(op) = head else {
                        return Ok(());
                    };
                    // This task owns the lane, so no attempt is running
                    tracing::warn!("Recovering orphaned in-flight {} on {}", op.id, entity);
                    match self.inner.store.return_to_pending(&op.id).await {
                        Ok(_)
                        | Err(StoreError::NotFound(_))
                        | Err(StoreError::InvalidTransition { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                LaneState::Blocked { by } => {
                    tracing::debug!("Lane {} blocked by {}", entity, by);
                    report.block(entity.clone());
                    return Ok(());
                }
                LaneState::Waiting { remaining } => {
                    tracing::debug!("Lane {} backing off for {:?}", entity, remaining);
                    if !self.backoff(remaining).await {
                        return Ok(());
                    }
                }
                LaneState::Ready => {
                    let Some(op) = head else {
                        return Ok(());
                    };
                    if let Step::Stop = self.attempt(op, report).await? {
                        if self.can_run() {
                            report.block(entity.clone());
                        }
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Sleep out a backoff. Returns `false` if the lane should end instead.
    ///
    /// Does not hold a worker slot.
    async fn backoff(&self, remaining: Duration) -> bool {
        let mut connectivity = self.inner.connectivity.clone();
        let mut shutdown = self.inner.shutdown.clone();

        tokio::select! {
            biased;
            _ = shutdown_signalled(&mut shutdown) => false,
            _ = connectivity.wait_offline() => false,
            _ = self.inner.lane_wake.notified() => true,
            _ = tokio::time::sleep(remaining) => true,
        }
    }

    /// Execute one operation, resolving at most one conflict.
    async fn attempt(&self, op: &SyncOperation, report: &mut DrainReport) -> Result<Step, StoreError> {
        let Ok(_permit) = self.inner.workers.acquire().await else {
            return Ok(Step::Stop);
        };
        if !self.can_run() {
            return Ok(Step::Stop);
        }

        let op = match self.inner.store.mark_in_flight(&op.id, Timestamp::now()).await {
            Ok(op) => op,
            // Dismissed or reset underneath us; re-read the lane
            Err(StoreError::NotFound(_)) | Err(StoreError::InvalidTransition { .. }) => {
                return Ok(Step::Continue)
            }
            Err(e) => return Err(e),
        };
        tracing::debug!("Executing {} {} on {}", op.op_type, op.id, op.entity);
        self.publish().await;

        let id = op.id;
        let result = self.attempt_in_flight(op, report).await;
        if result.is_err() {
            self.release(&id).await;
        }
        result
    }

    /// Hand an operation whose attempt failed on a store error back to
    /// `Pending`, so the next drain picks it up.
    async fn release(&self, id: &OperationId) {
        match self.inner.store.return_to_pending(id).await {
            Ok(_) => {
                tracing::warn!("Returned {} to pending after a store error", id);
                self.publish().await;
            }
            // Already settled before the error
            Err(StoreError::NotFound(_)) | Err(StoreError::InvalidTransition { .. }) => {}
            Err(e) => tracing::error!("Failed to return {} to pending: {}", id, e),
        }
    }

    async fn attempt_in_flight(
        &self,
        mut op: SyncOperation,
        report: &mut DrainReport,
    ) -> Result<Step, StoreError> {
        loop {
            let Some(result) = self.call_backend(&op).await else {
                self.inner.store.return_to_pending(&op.id).await?;
                tracing::warn!("Attempt on {} interrupted, returned to pending", op.id);
                report.interrupted += 1;
                self.publish().await;
                return Ok(Step::Stop);
            };

            match result {
                Ok(version) => {
                    self.inner.store.mark_succeeded(&op.id).await?;
                    self.inner.aggregator.clear_errors_for(&op.id);
                    tracing::debug!(
                        "Applied {} on {} (remote version {})",
                        op.id,
                        op.entity,
                        version
                    );
                    if let Some(base) = op.base_version {
                        let rebased = self
                            .inner
                            .store
                            .rebase_lane(&op.entity, base, version)
                            .await?;
                        if rebased > 0 {
                            tracing::debug!(
                                "Rebased {} queued operation(s) on {} to version {}",
                                rebased,
                                op.entity,
                                version
                            );
                        }
                    }
                    report.succeeded += 1;
                    self.publish().await;
                    return Ok(Step::Continue);
                }
                Err(ExecutionFailure::Conflict(remote)) if op.conflict_count == 0 => {
                    let resolution = resolve(&op, &remote);
                    tracing::warn!(
                        "Conflict on {} (remote version {}), deferring {} field(s) to remote",
                        op.id,
                        remote.version,
                        resolution.deferred.len()
                    );
                    report.conflicts_resolved += 1;

                    if resolution.is_noop() {
                        self.inner.store.mark_succeeded(&op.id).await?;
                        self.inner.aggregator.clear_errors_for(&op.id);
                        report.succeeded += 1;
                        self.publish().await;
                        return Ok(Step::Continue);
                    }

                    op = self
                        .inner
                        .store
                        .apply_resolution(&op.id, resolution.payload, resolution.base_version)
                        .await?;
                }
                Err(failure) => return self.handle_failure(&op, failure, report).await,
            }
        }
    }

    /// Race the backend call against connectivity loss and shutdown.
    ///
    /// `None` means the call was abandoned.
    async fn call_backend(
        &self,
        op: &SyncOperation,
    ) -> Option<Result<u64, ExecutionFailure>> {
        let mut connectivity = self.inner.connectivity.clone();
        let mut shutdown = self.inner.shutdown.clone();

        tokio::select! {
            biased;
            _ = shutdown_signalled(&mut shutdown) => None,
            _ = connectivity.wait_offline() => None,
            result = self.inner.backend.execute(op) => Some(result),
        }
    }

    async fn handle_failure(
        &self,
        op: &SyncOperation,
        failure: ExecutionFailure,
        report: &mut DrainReport,
    ) -> Result<Step, StoreError> {
        let classification = classify(&failure);
        // A conflict only gets here on its second occurrence
        let auto_retry =
            classification.retryable && !matches!(failure, ExecutionFailure::Conflict(_));

        let updated = if auto_retry {
            let delay = self.inner.policy.delay_for(op.retry_count + 1);
            let next_attempt_at = Timestamp::now().plus(delay);
            self.inner
                .store
                .mark_failed(&op.id, true, Some(next_attempt_at))
                .await?
        } else {
            self.inner.store.mark_failed(&op.id, false, None).await?
        };

        if updated.status == OperationStatus::FailedRetryable {
            tracing::debug!(
                "{} failed ({}), retry {} scheduled at {}",
                op.id,
                failure,
                updated.retry_count,
                updated
                    .next_attempt_at
                    .map(|at| at.to_string())
                    .unwrap_or_default()
            );
            report.retried += 1;
            self.publish().await;
            return Ok(Step::Continue);
        }

        tracing::info!(
            "{} failed terminally ({}: {}) after {} retries",
            op.id,
            classification.kind,
            failure,
            updated.retry_count
        );
        self.inner
            .aggregator
            .record_error(classification.to_sync_error(op.id, &failure));
        report.failed_terminal += 1;
        self.publish().await;
        Ok(Step::Stop)
    }

    async fn publish(&self) {
        if let Err(e) = self.inner.aggregator.refresh().await {
            tracing::error!("Failed to refresh sync status: {}", e);
        }
    }

    /// Background loop: drain on connectivity restored, on wake-up, and
    /// periodically while connected. Returns once shutdown is signalled and
    /// every lane has stopped.
    pub async fn run(self) {
        let mut connectivity = self.inner.connectivity.clone();
        let mut shutdown = self.inner.shutdown.clone();
        let period = self.inner.poll_interval;
        let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut lanes = JoinSet::new();

        tracing::info!("Executor started (poll interval: {:?})", period);
        self.dispatch_logged(&mut lanes).await;

        loop {
            tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                online = connectivity.changed() => {
                    if online {
                        tracing::info!("Connectivity restored, draining outbox");
                        self.dispatch_logged(&mut lanes).await;
                    } else {
                        tracing::info!("Connectivity lost, pausing outbox");
                    }
                }
                _ = self.inner.wake.notified() => self.dispatch_logged(&mut lanes).await,
                _ = timer.tick() => self.dispatch_logged(&mut lanes).await,
                Some(joined) = lanes.join_next(), if !lanes.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Lane task failed: {}", e);
                    }
                    // An operation may have been enqueued while the lane was
                    // winding down
                    self.dispatch_logged(&mut lanes).await;
                }
            }
        }

        // Lanes observe the same signal and return in-flight work to pending
        while lanes.join_next().await.is_some() {}
        tracing::info!("Executor stopped");
    }

    async fn dispatch_logged(&self, lanes: &mut JoinSet<DrainReport>) {
        if let Err(e) = self.dispatch(lanes).await {
            tracing::error!("Failed to read outbox: {}", e);
        }
    }
}

/// Resolve once shutdown is signalled or the signal's owner is gone.
pub(crate) async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::connectivity::{connectivity, ConnectivityHandle};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use sync_types::{NewOperation, Payload, RemoteState};
    use tokio::sync::mpsc;

    struct Harness {
        executor: RetryExecutor,
        store: Arc<MemoryStore>,
        backend: MockBackend,
        aggregator: SyncStatusAggregator,
        network: ConnectivityHandle,
        shutdown: watch::Sender<bool>,
        _commands: mpsc::Receiver<crate::status::Command>,
    }

    fn harness(online: bool) -> Harness {
        let store = Arc::new(MemoryStore::new());
        harness_over(store.clone(), store, online)
    }

    /// The executor sees `executor_store`; tests inspect `store`.
    fn harness_over(
        store: Arc<MemoryStore>,
        executor_store: Arc<dyn OperationStore>,
        online: bool,
    ) -> Harness {
        let backend = MockBackend::new();
        let (tx, rx) = mpsc::channel(8);
        let aggregator = SyncStatusAggregator::new(store.clone(), tx);
        let (network, watch) = connectivity(online);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let config = ExecutorConfig {
            max_workers: 2,
            poll_interval_secs: 30,
        };
        let policy = RetryPolicy::new(Duration::from_millis(5), Duration::from_millis(40));
        let executor = RetryExecutor::new(
            executor_store,
            Arc::new(backend.clone()),
            aggregator.clone(),
            watch,
            &config,
            policy,
            shutdown_rx,
        );
        Harness {
            executor,
            store,
            backend,
            aggregator,
            network,
            shutdown,
            _commands: rx,
        }
    }

    /// Memory store whose next settle (`mark_succeeded` or `mark_failed`)
    /// fails with a database error.
    struct FlakyStore {
        inner: MemoryStore,
        fail_settle: AtomicBool,
    }

    impl FlakyStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                fail_settle: AtomicBool::new(false),
            }
        }

        fn fail_next_settle(&self) {
            self.fail_settle.store(true, Ordering::SeqCst);
        }

        fn settle_error(&self) -> Result<(), StoreError> {
            if self.fail_settle.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl OperationStore for FlakyStore {
        async fn enqueue(&self, new: NewOperation) -> Result<OperationId, StoreError> {
            self.inner.enqueue(new).await
        }

        async fn get(&self, id: &OperationId) -> Result<Option<SyncOperation>, StoreError> {
            self.inner.get(id).await
        }

        async fn list_pending(&self) -> Result<Vec<SyncOperation>, StoreError> {
            self.inner.list_pending().await
        }

        async fn list_entity(&self, entity: &EntityRef) -> Result<Vec<SyncOperation>, StoreError> {
            self.inner.list_entity(entity).await
        }

        async fn mark_in_flight(
            &self,
            id: &OperationId,
            now: Timestamp,
        ) -> Result<SyncOperation, StoreError> {
            self.inner.mark_in_flight(id, now).await
        }

        async fn mark_succeeded(&self, id: &OperationId) -> Result<SyncOperation, StoreError> {
            self.settle_error()?;
            self.inner.mark_succeeded(id).await
        }

        async fn mark_failed(
            &self,
            id: &OperationId,
            retryable: bool,
            next_attempt_at: Option<Timestamp>,
        ) -> Result<SyncOperation, StoreError> {
            self.settle_error()?;
            self.inner.mark_failed(id, retryable, next_attempt_at).await
        }

        async fn return_to_pending(&self, id: &OperationId) -> Result<SyncOperation, StoreError> {
            self.inner.return_to_pending(id).await
        }

        async fn reset_for_retry(&self, id: &OperationId) -> Result<SyncOperation, StoreError> {
            self.inner.reset_for_retry(id).await
        }

        async fn apply_resolution(
            &self,
            id: &OperationId,
            payload: Payload,
            base_version: u64,
        ) -> Result<SyncOperation, StoreError> {
            self.inner.apply_resolution(id, payload, base_version).await
        }

        async fn rebase_lane(
            &self,
            entity: &EntityRef,
            from: u64,
            to: u64,
        ) -> Result<u64, StoreError> {
            self.inner.rebase_lane(entity, from, to).await
        }

        async fn remove(&self, id: &OperationId) -> Result<Option<SyncOperation>, StoreError> {
            self.inner.remove(id).await
        }

        async fn recover_interrupted(&self) -> Result<u64, StoreError> {
            self.inner.recover_interrupted().await
        }
    }

    fn entity(id: &str) -> EntityRef {
        EntityRef::new("profile", id)
    }

    fn fields(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn drain_applies_lane_in_order() {
        let h = harness(true);
        h.store
            .enqueue(NewOperation::update(entity("x"), fields(json!({"n": 1}))))
            .await
            .unwrap();
        h.store
            .enqueue(NewOperation::update(entity("x"), fields(json!({"n": 2}))))
            .await
            .unwrap();

        let report = h.executor.drain().await.unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(h.backend.value(&entity("x"), "n"), Some(json!(2)));
        let applied = h.backend.applied();
        assert_eq!(applied[0].payload["n"], json!(1));
        assert_eq!(applied[1].payload["n"], json!(2));
        assert!(h.store.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lane_follows_its_own_writes() {
        let h = harness(true);
        for name in ["A", "B"] {
            h.store
                .enqueue(
                    NewOperation::update(entity("x"), fields(json!({ "name": name })))
                        .with_base_version(0),
                )
                .await
                .unwrap();
        }

        let report = h.executor.drain().await.unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.conflicts_resolved, 0);
        assert_eq!(h.backend.value(&entity("x"), "name"), Some(json!("B")));
        assert_eq!(h.backend.applied()[1].base_version, Some(1));
        assert_eq!(h.backend.record(&entity("x")).unwrap().version, 2);
    }

    #[tokio::test]
    async fn store_error_mid_attempt_returns_to_pending() {
        let memory = Arc::new(MemoryStore::new());
        let flaky = Arc::new(FlakyStore::new((*memory).clone()));
        let h = harness_over(memory, flaky.clone(), true);
        h.backend.fail_next(ExecutionFailure::Timeout);
        flaky.fail_next_settle();
        let id = h
            .store
            .enqueue(NewOperation::delete(entity("x")))
            .await
            .unwrap();

        let report = h.executor.drain().await.unwrap();

        assert_eq!(report.succeeded, 0);
        let op = h.store.get(&id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);

        let report = h.executor.drain().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(h.store.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn orphaned_in_flight_head_is_recovered() {
        let h = harness(true);
        let id = h
            .store
            .enqueue(NewOperation::delete(entity("x")))
            .await
            .unwrap();
        h.store.mark_in_flight(&id, Timestamp::now()).await.unwrap();

        let report = h.executor.drain().await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(h.backend.applied().len(), 1);
        assert!(h.store.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn drain_does_nothing_offline() {
        let h = harness(false);
        h.store
            .enqueue(NewOperation::delete(entity("x")))
            .await
            .unwrap();

        let report = h.executor.drain().await.unwrap();

        assert!(report.is_idle());
        assert_eq!(h.backend.calls(), 0);
        assert_eq!(h.store.list_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn terminal_failure_blocks_only_its_lane() {
        let h = harness(true);
        h.backend
            .fail_next_for(&entity("x"), ExecutionFailure::Validation("bad".into()));
        let first = h
            .store
            .enqueue(NewOperation::update(entity("x"), fields(json!({"n": 1}))))
            .await
            .unwrap();
        h.store
            .enqueue(NewOperation::update(entity("x"), fields(json!({"n": 2}))))
            .await
            .unwrap();
        h.store
            .enqueue(NewOperation::update(entity("y"), fields(json!({"n": 3}))))
            .await
            .unwrap();

        let report = h.executor.drain().await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed_terminal, 1);
        assert_eq!(report.blocked, vec![entity("x")]);
        assert_eq!(h.backend.value(&entity("y"), "n"), Some(json!(3)));

        let pending = h.store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first);
        assert_eq!(pending[0].status, OperationStatus::FailedTerminal);
        assert_eq!(pending[1].status, OperationStatus::Pending);

        let errors = h.aggregator.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].operation_id, first);
        assert!(!errors[0].is_retryable);
    }

    #[tokio::test]
    async fn transient_failures_back_off_then_succeed() {
        let h = harness(true);
        h.backend
            .fail_times(ExecutionFailure::Unreachable("no route".into()), 2);
        h.store
            .enqueue(NewOperation::delete(entity("x")))
            .await
            .unwrap();

        let report = h.executor.drain().await.unwrap();

        assert_eq!(report.retried, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(h.backend.calls(), 3);
        assert!(h.aggregator.errors().is_empty());
    }

    #[tokio::test]
    async fn second_conflict_is_terminal() {
        let h = harness(true);
        let later = Timestamp::now().plus(Duration::from_secs(3600));
        h.backend
            .write_remote(&entity("x"), "name", json!("remote"), Timestamp::from_millis(1));
        h.backend.fail_next(ExecutionFailure::Conflict(
            RemoteState::new(9).with_field("bio", json!("r"), later),
        ));
        h.backend.fail_next(ExecutionFailure::Conflict(RemoteState::new(10)));
        let id = h
            .store
            .enqueue(
                NewOperation::update(entity("x"), fields(json!({"name": "local"})))
                    .with_base_version(1),
            )
            .await
            .unwrap();

        let report = h.executor.drain().await.unwrap();

        assert_eq!(report.conflicts_resolved, 1);
        assert_eq!(report.failed_terminal, 1);
        let op = h.store.get(&id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::FailedTerminal);
        assert_eq!(op.conflict_count, 1);
        assert_eq!(op.base_version, Some(9));
        assert_eq!(op.retry_count, 0);
        assert_eq!(h.aggregator.errors()[0].kind, sync_types::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn conflict_fully_won_by_remote_is_noop_success() {
        let h = harness(true);
        let later = Timestamp::now().plus(Duration::from_secs(3600));
        h.backend.fail_next(ExecutionFailure::Conflict(
            RemoteState::new(4).with_field("name", json!("remote"), later),
        ));
        h.store
            .enqueue(NewOperation::update(entity("x"), fields(json!({"name": "local"}))))
            .await
            .unwrap();

        let report = h.executor.drain().await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.conflicts_resolved, 1);
        assert_eq!(h.backend.calls(), 1);
        assert!(h.store.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn disconnect_mid_call_returns_to_pending() {
        let h = harness(true);
        h.backend.set_latency(Duration::from_millis(200));
        let id = h
            .store
            .enqueue(NewOperation::delete(entity("x")))
            .await
            .unwrap();

        let executor = h.executor.clone();
        let drain = tokio::spawn(async move { executor.drain().await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        h.network.set_online(false);

        let report = drain.await.unwrap().unwrap();
        assert_eq!(report.interrupted, 1);

        let op = h.store.get(&id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert!(h.backend.applied().is_empty());
    }

    #[tokio::test]
    async fn run_loop_drains_on_reconnect_and_stops_on_shutdown() {
        let h = harness(false);
        h.store
            .enqueue(NewOperation::delete(entity("x")))
            .await
            .unwrap();
        h.aggregator.refresh().await.unwrap();

        let task = tokio::spawn(h.executor.clone().run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.backend.calls(), 0);

        h.network.set_online(true);
        let mut status = h.aggregator.subscribe();
        tokio::time::timeout(
            Duration::from_secs(1),
            status.wait_for(|s| s.pending_operations.is_empty()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(h.backend.applied().len(), 1);

        h.shutdown.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn wake_dispatches_new_work() {
        let h = harness(true);
        let task = tokio::spawn(h.executor.clone().run());
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.store
            .enqueue(NewOperation::delete(entity("x")))
            .await
            .unwrap();
        h.executor.wake();

        let mut status = h.aggregator.subscribe();
        tokio::time::timeout(
            Duration::from_secs(1),
            status.wait_for(|_| !h.backend.applied().is_empty()),
        )
        .await
        .unwrap()
        .unwrap();

        h.shutdown.send_replace(true);
        task.await.unwrap();
    }
}
