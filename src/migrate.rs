//! Database schema migrations (idempotent).
//!
//! | Table | Contents |
//! |-------|----------|
//! | `index_entries` | one row per chunk: text, offsets, labels, embedding BLOB |
//! | `registry` | one row per document: ingestion status and fingerprint |

use sqlx::SqlitePool;

use lore_harness_core::Result;

use crate::config::Config;
use crate::db::{self, db_err};

/// Connect to the configured database and create any missing tables.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create any missing tables and indexes on `pool`.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_entries (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            byte_start INTEGER NOT NULL,
            byte_end INTEGER NOT NULL,
            char_start INTEGER NOT NULL,
            char_end INTEGER NOT NULL,
            context TEXT,
            volume TEXT,
            chapter TEXT,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS registry (
            document_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            fingerprint TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_err)?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_index_entries_document ON index_entries(document_id)",
    )
    .execute(pool)
    .await
    .map_err(db_err)?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_index_entries_volume ON index_entries(volume)")
        .execute(pool)
        .await
        .map_err(db_err)?;

    Ok(())
}
