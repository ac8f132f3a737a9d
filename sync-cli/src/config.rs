//! Data directory layout for the outbox CLI.
//!
//! ```text
//! <data-dir>/
//!   outbox.toml   optional engine configuration
//!   outbox.db     operation store (unless [storage].database says otherwise)
//!   errors.json   sync errors surfaced by earlier `sync` runs
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sync_client::{Config, Connectivity, MockBackend, RemoteBackend, SqliteStore, SyncEngine};
use sync_types::{OperationId, SyncError};

/// Engine configuration file inside the data directory.
pub const CONFIG_FILE: &str = "outbox.toml";

/// Error log file inside the data directory.
pub const ERRORS_FILE: &str = "errors.json";

/// Load `<data-dir>/outbox.toml`, falling back to defaults when absent.
pub fn load(data_dir: &Path) -> Result<Config> {
    let path = data_dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(Config::default());
    }
    Config::from_file(&path).context("Invalid outbox configuration")
}

/// Resolve the database path; relative paths live in the data directory.
pub fn database_path(data_dir: &Path, config: &Config) -> PathBuf {
    if config.storage.database.is_absolute() {
        config.storage.database.clone()
    } else {
        data_dir.join(&config.storage.database)
    }
}

/// Open the operation store described by the data directory.
pub async fn open_store(data_dir: &Path) -> Result<(Config, Arc<SqliteStore>)> {
    let config = load(data_dir)?;
    let path = database_path(data_dir, &config);
    let store = SqliteStore::new(&path)
        .await
        .with_context(|| format!("Failed to open operation store at {}", path.display()))?;
    Ok((config, Arc::new(store)))
}

/// Open an engine over the data directory without a background executor.
///
/// Without a backend the engine gets an idle mock it never calls, since
/// nothing is sent until `sync_now`.
pub async fn open_engine(
    data_dir: &Path,
    backend: Option<Arc<dyn RemoteBackend>>,
) -> Result<SyncEngine> {
    let (config, store) = open_store(data_dir).await?;
    let online = backend.is_some();
    let backend: Arc<dyn RemoteBackend> = match backend {
        Some(backend) => backend,
        None => Arc::new(MockBackend::new()),
    };
    SyncEngine::open(&config, store, backend, Connectivity::fixed(online))
        .await
        .context("Failed to open sync engine")
}

/// Sync errors carried between CLI invocations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorLog {
    /// Surfaced errors, oldest first.
    pub errors: Vec<SyncError>,
}

impl ErrorLog {
    /// Load the error log. A missing file is an empty log.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(ERRORS_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = tokio::fs::read_to_string(&path)
            .await
            .context("Failed to read error log")?;
        serde_json::from_str(&contents).context("Invalid error log")
    }

    /// Save the error log.
    pub async fn save(&self, data_dir: &Path) -> Result<()> {
        let path = data_dir.join(ERRORS_FILE);
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, contents)
            .await
            .context("Failed to save error log")?;
        set_file_permissions_0600(&path).await?;
        Ok(())
    }

    /// Add fresh errors. Each replaces older errors for the same operation.
    pub fn record(&mut self, errors: impl IntoIterator<Item = SyncError>) {
        for error in errors {
            self.remove_operation(&error.operation_id);
            self.errors.push(error);
        }
        self.errors.sort_by_key(|e| (e.occurred_at, e.id));
    }

    /// Drop the errors for one operation.
    pub fn remove_operation(&mut self, id: &OperationId) -> usize {
        let before = self.errors.len();
        self.errors.retain(|e| e.operation_id != *id);
        before - self.errors.len()
    }

    /// Drop every error, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.errors.len();
        self.errors.clear();
        count
    }
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
async fn set_file_permissions_0600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .context("Failed to set file permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::ErrorKind;
    use tempfile::tempdir;

    fn error_for(id: OperationId, message: &str) -> SyncError {
        SyncError::new(id, ErrorKind::Validation, message, None, false)
    }

    #[test]
    fn missing_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = load(dir.path()).unwrap();
        assert_eq!(config.executor.max_workers, 4);
        assert_eq!(
            database_path(dir.path(), &config),
            dir.path().join("outbox.db")
        );
    }

    #[test]
    fn config_file_is_read() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[storage]\ndatabase = \"queue.db\"\n",
        )
        .unwrap();

        let config = load(dir.path()).unwrap();
        assert_eq!(
            database_path(dir.path(), &config),
            dir.path().join("queue.db")
        );
    }

    #[test]
    fn bad_config_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[executor\n").unwrap();
        assert!(load(dir.path()).is_err());
    }

    #[tokio::test]
    async fn error_log_roundtrip() {
        let dir = tempdir().unwrap();
        assert!(ErrorLog::load(dir.path()).await.unwrap().errors.is_empty());

        let mut log = ErrorLog::default();
        log.record([error_for(OperationId::new(), "denied")]);
        log.save(dir.path()).await.unwrap();

        let loaded = ErrorLog::load(dir.path()).await.unwrap();
        assert_eq!(loaded.errors, log.errors);
    }

    #[test]
    fn error_log_keeps_latest_per_operation() {
        let op = OperationId::new();
        let mut log = ErrorLog::default();
        log.record([error_for(op, "first")]);
        log.record([error_for(op, "second"), error_for(OperationId::new(), "other")]);

        assert_eq!(log.errors.len(), 2);
        assert_eq!(log.remove_operation(&op), 1);
        assert_eq!(log.clear(), 1);
        assert!(log.errors.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn error_log_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        ErrorLog::default().save(dir.path()).await.unwrap();

        let path = dir.path().join(ERRORS_FILE);
        let perms = tokio::fs::metadata(&path).await.unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600, "file should be 0600");
    }
}
