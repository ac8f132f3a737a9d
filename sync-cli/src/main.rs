//! # outbox
//!
//! CLI for inspecting and driving an offline outbox.
//!
//! ## Commands
//!
//! - `enqueue`: Queue a create, update or delete
//! - `status`: Show queued operations and sync errors
//! - `sync`: Drain the outbox once
//! - `retry`: Reset a failed operation's retry budget
//! - `dismiss`: Drop an operation without applying it
//! - `clear-errors`: Acknowledge every sync error
//!
//! ## Example
//!
//! ```bash
//! # Queue an update
//! outbox enqueue --kind profile --entity 42 --op update --payload '{"bio": "hi"}'
//!
//! # Drain against the in-memory backend
//! outbox sync --mock
//!
//! # Inspect what is left
//! outbox status --json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use sync_types::{EntityRef, OperationId, OperationType};

mod commands;
mod config;

use commands::{clear_errors, dismiss, enqueue, retry, status, sync};

/// CLI for inspecting and driving an offline outbox.
#[derive(Parser, Debug)]
#[command(name = "outbox")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory holding the operation store and configuration
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue a mutation
    Enqueue {
        /// Entity kind (e.g. "profile")
        #[arg(long)]
        kind: String,

        /// Entity identifier
        #[arg(long)]
        entity: String,

        /// Mutation type: create, update or delete
        #[arg(long)]
        op: OperationType,

        /// JSON object with the record (create) or changed fields (update)
        #[arg(long)]
        payload: Option<String>,

        /// Remote version this mutation assumes
        #[arg(long)]
        base_version: Option<u64>,
    },

    /// Show queued operations and sync errors
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Drain the outbox once
    Sync {
        /// Use an in-memory mock backend
        #[arg(long)]
        mock: bool,

        /// Make the mock reject every operation with this validation message
        #[arg(long, requires = "mock")]
        reject: Option<String>,
    },

    /// Reset a failed operation and queue it again
    Retry {
        /// Operation identifier
        id: OperationId,
    },

    /// Drop an operation without applying it
    Dismiss {
        /// Operation identifier
        id: OperationId,
    },

    /// Acknowledge every sync error (queued operations are kept)
    ClearErrors,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;
    tracing::debug!("Using data directory {}", data_dir.display());

    match cli.command {
        Commands::Enqueue {
            kind,
            entity,
            op,
            payload,
            base_version,
        } => {
            let entity = EntityRef::new(kind, entity);
            enqueue::run(&data_dir, entity, op, payload.as_deref(), base_version).await?;
        }
        Commands::Status { json } => {
            status::run(&data_dir, json).await?;
        }
        Commands::Sync { mock, reject } => {
            let options = mock.then(|| sync::MockOptions { reject });
            sync::run(&data_dir, options).await?;
        }
        Commands::Retry { id } => {
            retry::run(&data_dir, &id).await?;
        }
        Commands::Dismiss { id } => {
            dismiss::run(&data_dir, &id).await?;
        }
        Commands::ClearErrors => {
            clear_errors::run(&data_dir).await?;
        }
    }

    Ok(())
}

/// Log to stderr, filtered by `RUST_LOG` (default: warn).
fn setup_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Get the default data directory for the outbox.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "ydun", "outbox")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
