//! SQLite operation store.

use super::OperationStore;
use crate::error::StoreError;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use sync_core::QueueError;
use sync_types::{
    EntityRef, NewOperation, OperationId, OperationStatus, Payload, SyncOperation, Timestamp,
};
use tokio::sync::Mutex;

const SELECT_COLUMNS: &str = r#"
    SELECT seq, id, entity_kind, entity_id, op_type, payload, created_at, retry_count,
           status, last_attempt_at, next_attempt_at, base_version, conflict_count
    FROM operations
"#;

/// SQLite-based operation store.
///
/// Uses WAL mode. Every transition is a read-modify-write inside one
/// transaction, serialized by a process-wide write lock.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl SqliteStore {
    /// Open (or create) the store at `path`.
    pub async fn new(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool);
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(":memory:")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // One connection that is never recycled: the database lives in it
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool);
        store.run_migrations().await?;
        Ok(store)
    }

    fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS operations (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                entity_kind TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                op_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                last_attempt_at INTEGER,
                next_attempt_at INTEGER,
                base_version INTEGER,
                conflict_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_operations_order ON operations(created_at, seq)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_operations_entity ON operations(entity_kind, entity_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Apply a lifecycle transition to one operation atomically.
    async fn modify<F>(&self, id: &OperationId, apply: F) -> Result<SyncOperation, StoreError>
    where
        F: FnOnce(&mut SyncOperation) -> Result<(), QueueError> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut op = fetch_operation(&mut tx, id)
            .await?
            .ok_or(StoreError::NotFound(*id))?;
        apply(&mut op)?;
        write_operation(&mut tx, &op).await?;

        tx.commit().await?;
        Ok(op)
    }
}

async fn fetch_operation(
    conn: &mut SqliteConnection,
    id: &OperationId,
) -> Result<Option<SyncOperation>, StoreError> {
    let row = sqlx::query_as::<_, OperationRow>(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.map(SyncOperation::try_from).transpose()
}

async fn write_operation(conn: &mut SqliteConnection, op: &SyncOperation) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE operations
        SET payload = ?2, retry_count = ?3, status = ?4, last_attempt_at = ?5,
            next_attempt_at = ?6, base_version = ?7, conflict_count = ?8
        WHERE id = ?1
        "#,
    )
    .bind(op.id.to_string())
    .bind(serde_json::to_string(&op.payload)?)
    .bind(op.retry_count as i64)
    .bind(op.status.as_str())
    .bind(op.last_attempt_at.map(to_db_time))
    .bind(op.next_attempt_at.map(to_db_time))
    .bind(op.base_version.map(|v| v as i64))
    .bind(op.conflict_count as i64)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Decode the rows of a whole-outbox listing.
///
/// A row that no longer decodes is logged and left out so the rest of the
/// outbox keeps syncing. Its lane still fails in `list_entity`, which keeps
/// the operations behind it from overtaking it.
fn decode_listed(rows: Vec<OperationRow>) -> Vec<SyncOperation> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            match SyncOperation::try_from(row) {
                Ok(op) => Some(op),
                Err(e) => {
                    tracing::warn!("Skipping undecodable operation {}: {}", id, e);
                    None
                }
            }
        })
        .collect()
}

fn to_db_time(ts: Timestamp) -> i64 {
    ts.as_millis() as i64
}

fn from_db_time(value: i64) -> Timestamp {
    Timestamp::from_millis(value.max(0) as u64)
}

#[async_trait]
impl OperationStore for SqliteStore {
    async fn enqueue(&self, new: NewOperation) -> Result<OperationId, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        // Never sort before a retained operation, even if the clock stepped back
        let latest: Option<i64> = sqlx::query_scalar("SELECT MAX(created_at) FROM operations")
            .fetch_one(&mut *tx)
            .await?;
        let created_at = to_db_time(Timestamp::now()).max(latest.unwrap_or(0));

        let id = OperationId::new();
        sqlx::query(
            r#"
            INSERT INTO operations
                (id, entity_kind, entity_id, op_type, payload, created_at, status, base_version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(id.to_string())
        .bind(&new.entity.kind)
        .bind(&new.entity.id)
        .bind(new.op_type.as_str())
        .bind(serde_json::to_string(&new.payload)?)
        .bind(created_at)
        .bind(OperationStatus::Pending.as_str())
        .bind(new.base_version.map(|v| v as i64))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn get(&self, id: &OperationId) -> Result<Option<SyncOperation>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_operation(&mut conn, id).await
    }

    async fn list_pending(&self) -> Result<Vec<SyncOperation>, StoreError> {
        let rows = sqlx::query_as::<_, OperationRow>(&format!(
            "{SELECT_COLUMNS} ORDER BY created_at ASC, seq ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_listed(rows))
    }

    async fn list_entity(&self, entity: &EntityRef) -> Result<Vec<SyncOperation>, StoreError> {
        let rows = sqlx::query_as::<_, OperationRow>(&format!(
            "{SELECT_COLUMNS} WHERE entity_kind = ?1 AND entity_id = ?2 ORDER BY created_at ASC, seq ASC"
        ))
        .bind(&entity.kind)
        .bind(&entity.id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SyncOperation::try_from).collect()
    }

    async fn mark_in_flight(
        &self,
        id: &OperationId,
        now: Timestamp,
    ) -> Result<SyncOperation, StoreError> {
        self.modify(id, |op| sync_core::start_attempt(op, now)).await
    }

    async fn mark_succeeded(&self, id: &OperationId) -> Result<SyncOperation, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut op = fetch_operation(&mut tx, id)
            .await?
            .ok_or(StoreError::NotFound(*id))?;
        sync_core::complete_attempt(&mut op)?;

        sqlx::query("DELETE FROM operations WHERE id = ?1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(op)
    }

    async fn mark_failed(
        &self,
        id: &OperationId,
        retryable: bool,
        next_attempt_at: Option<Timestamp>,
    ) -> Result<SyncOperation, StoreError> {
        self.modify(id, |op| {
            sync_core::fail_attempt(op, retryable, next_attempt_at)
        })
        .await
    }

    async fn return_to_pending(&self, id: &OperationId) -> Result<SyncOperation, StoreError> {
        self.modify(id, sync_core::interrupt_attempt).await
    }

    async fn reset_for_retry(&self, id: &OperationId) -> Result<SyncOperation, StoreError> {
        self.modify(id, sync_core::reset_retries).await
    }

    async fn apply_resolution(
        &self,
        id: &OperationId,
        payload: Payload,
        base_version: u64,
    ) -> Result<SyncOperation, StoreError> {
        self.modify(id, move |op| {
            sync_core::replace_payload(op, payload, base_version)
        })
        .await
    }

    async fn rebase_lane(
        &self,
        entity: &EntityRef,
        from: u64,
        to: u64,
    ) -> Result<u64, StoreError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            r#"
            UPDATE operations SET base_version = ?1
            WHERE entity_kind = ?2 AND entity_id = ?3 AND base_version = ?4 AND status != ?5
            "#,
        )
        .bind(to as i64)
        .bind(&entity.kind)
        .bind(&entity.id)
        .bind(from as i64)
        .bind(OperationStatus::InFlight.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn remove(&self, id: &OperationId) -> Result<Option<SyncOperation>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let op = fetch_operation(&mut tx, id).await?;
        if op.is_some() {
            sqlx::query("DELETE FROM operations WHERE id = ?1")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(op)
    }

    async fn recover_interrupted(&self) -> Result<u64, StoreError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE operations SET status = ?1 WHERE status = ?2")
            .bind(OperationStatus::Pending.as_str())
            .bind(OperationStatus::InFlight.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct OperationRow {
    seq: i64,
    id: String,
    entity_kind: String,
    entity_id: String,
    op_type: String,
    payload: String,
    created_at: i64,
    retry_count: i64,
    status: String,
    last_attempt_at: Option<i64>,
    next_attempt_at: Option<i64>,
    base_version: Option<i64>,
    conflict_count: i64,
}

impl TryFrom<OperationRow> for SyncOperation {
    type Error = StoreError;

    fn try_from(row: OperationRow) -> Result<Self, Self::Error> {
        Ok(SyncOperation {
            id: row.id.parse()?,
            entity: EntityRef::new(row.entity_kind, row.entity_id),
            op_type: row.op_type.parse()?,
            payload: serde_json::from_str(&row.payload)?,
            created_at: from_db_time(row.created_at),
            seq: row.seq.max(0) as u64,
            retry_count: row.retry_count.max(0) as u32,
            status: row.status.parse()?,
            last_attempt_at: row.last_attempt_at.map(from_db_time),
            next_attempt_at: row.next_attempt_at.map(from_db_time),
            base_version: row.base_version.map(|v| v.max(0) as u64),
            conflict_count: row.conflict_count.max(0) as u32,
        })
    }
}
