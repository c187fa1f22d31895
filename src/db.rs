//! SQLite database connection management.
//!
//! Provides a connection pool to the SQLite database with WAL mode
//! enabled so that ingestion writes and agent queries can overlap. The
//! database file and its parent directories are created automatically.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use lore_harness_core::{HarnessError, Result};

use crate::config::Config;

/// Create a connection pool to the configured SQLite database.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    connect_path(&config.db.path).await
}

/// Create a connection pool to the SQLite database at `db_path`.
///
/// # Errors
///
/// [`HarnessError::VectorStoreUnavailable`] if the file or its parent
/// directory cannot be created, or the pool cannot connect.
pub async fn connect_path(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            HarnessError::VectorStoreUnavailable(format!(
                "cannot create {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .map_err(db_err)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(db_err)
}

/// Map a database error into the vector-store failure class.
pub fn db_err(e: sqlx::Error) -> HarnessError {
    HarnessError::VectorStoreUnavailable(e.to_string())
}
