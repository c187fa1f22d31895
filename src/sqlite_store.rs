//! SQLite-backed [`VectorIndex`] and [`RegistryStore`].
//!
//! Vectors are stored as little-endian f32 BLOBs in `index_entries`.
//! Queries load the candidate rows and rank them with the same brute-force
//! cosine ranking as the in-memory index, so both backends agree on order.
//! Each `upsert` and `replace_document` runs in one transaction; readers
//! see all of it or none.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use lore_harness_core::embedding::{blob_to_vec, vec_to_blob};
use lore_harness_core::models::{
    Chunk, Embedding, EntryMetadata, IndexEntry, IngestStatus, QueryFilter, RegistryRecord,
    ScoredEntry,
};
use lore_harness_core::search::nearest;
use lore_harness_core::store::{check_dims, check_query_dims, RegistryStore, VectorIndex};
use lore_harness_core::{HarnessError, Result};

use crate::db::db_err;

/// SQLite implementation of [`VectorIndex`].
pub struct SqliteIndex {
    pool: SqlitePool,
    dims: usize,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Fail if stored vectors were written with a different dimensionality,
    /// e.g. after switching embedding models without re-ingesting.
    pub async fn check_stored_dims(&self) -> Result<()> {
        let stored: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM index_entries WHERE dims != ? LIMIT 1")
                .bind(self.dims as i64)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        match stored {
            Some(actual) => Err(HarnessError::DimensionMismatch {
                expected: self.dims,
                actual: actual.max(0) as usize,
            }),
            None => Ok(()),
        }
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<IndexEntry> {
    let chunk_id: String = row.try_get("chunk_id").map_err(db_err)?;
    let document_id: String = row.try_get("document_id").map_err(db_err)?;
    let chapter: Option<String> = row.try_get("chapter").map_err(db_err)?;
    let blob: Vec<u8> = row.try_get("embedding").map_err(db_err)?;
    let int = |col: &str| -> Result<usize> {
        let v: i64 = row.try_get(col).map_err(db_err)?;
        Ok(v.max(0) as usize)
    };

    let chunk = Chunk {
        id: chunk_id.clone(),
        document_id: document_id.clone(),
        ordinal: int("ordinal")?,
        text: row.try_get("text").map_err(db_err)?,
        byte_start: int("byte_start")?,
        byte_end: int("byte_end")?,
        char_start: int("char_start")?,
        char_end: int("char_end")?,
        context: row.try_get("context").map_err(db_err)?,
        chapter: chapter.clone(),
        hash: row.try_get("hash").map_err(db_err)?,
    };
    Ok(IndexEntry {
        embedding: Embedding {
            subject: chunk_id,
            vector: blob_to_vec(&blob),
        },
        chunk,
        metadata: EntryMetadata {
            document_id,
            volume: row.try_get("volume").map_err(db_err)?,
            chapter,
        },
    })
}

async fn write_entry(conn: &mut SqliteConnection, e: &IndexEntry, dims: usize) -> Result<()> {
    let c = &e.chunk;
    sqlx::query(
        r#"
        INSERT INTO index_entries (chunk_id, document_id, ordinal, text, hash,
                                   byte_start, byte_end, char_start, char_end,
                                   context, volume, chapter, dims, embedding)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            document_id = excluded.document_id,
            ordinal = excluded.ordinal,
            text = excluded.text,
            hash = excluded.hash,
            byte_start = excluded.byte_start,
            byte_end = excluded.byte_end,
            char_start = excluded.char_start,
            char_end = excluded.char_end,
            context = excluded.context,
            volume = excluded.volume,
            chapter = excluded.chapter,
            dims = excluded.dims,
            embedding = excluded.embedding
        "#,
    )
    .bind(&c.id)
    .bind(&c.document_id)
    .bind(c.ordinal as i64)
    .bind(&c.text)
    .bind(&c.hash)
    .bind(c.byte_start as i64)
    .bind(c.byte_end as i64)
    .bind(c.char_start as i64)
    .bind(c.char_end as i64)
    .bind(&c.context)
    .bind(&e.metadata.volume)
    .bind(&e.metadata.chapter)
    .bind(dims as i64)
    .bind(vec_to_blob(e.vector()))
    .execute(conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        check_dims(entries, self.dims)?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for e in entries {
            write_entry(&mut *tx, e, self.dims).await?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn replace_document(&self, document_id: &str, entries: &[IndexEntry]) -> Result<usize> {
        check_dims(entries, self.dims)?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let removed = sqlx::query("DELETE FROM index_entries WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();
        for e in entries {
            write_entry(&mut *tx, e, self.dims).await?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(removed as usize)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<ScoredEntry>> {
        check_query_dims(vector, self.dims)?;

        let rows = match filter.and_then(|f| f.document_id.as_deref()) {
            Some(doc) => sqlx::query("SELECT * FROM index_entries WHERE document_id = ?")
                .bind(doc)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?,
            None => sqlx::query("SELECT * FROM index_entries")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?,
        };

        let entries = rows.iter().map(row_to_entry).collect::<Result<Vec<_>>>()?;
        Ok(nearest(&entries, vector, k, filter))
    }

    async fn delete(&self, document_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM index_entries WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(n as usize)
    }

    async fn count_for(&self, document_id: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(n as usize)
    }
}

/// SQLite implementation of [`RegistryStore`].
pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn reg_err(e: sqlx::Error) -> HarnessError {
    HarnessError::RegistryUnavailable(e.to_string())
}

fn row_to_record(row: &SqliteRow) -> Result<RegistryRecord> {
    let status: String = row.try_get("status").map_err(reg_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(reg_err)?;
    let chunk_count: i64 = row.try_get("chunk_count").map_err(reg_err)?;
    let attempts: i64 = row.try_get("attempts").map_err(reg_err)?;

    Ok(RegistryRecord {
        document_id: row.try_get("document_id").map_err(reg_err)?,
        status: IngestStatus::parse(&status).ok_or_else(|| {
            HarnessError::RegistryUnavailable(format!("unknown registry status '{}'", status))
        })?,
        chunk_count: chunk_count.max(0) as usize,
        fingerprint: row.try_get("fingerprint").map_err(reg_err)?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| HarnessError::RegistryUnavailable(format!("bad timestamp: {}", e)))?,
        attempts: attempts.max(0) as u32,
        last_error: row.try_get("last_error").map_err(reg_err)?,
    })
}

#[async_trait]
impl RegistryStore for SqliteRegistry {
    async fn get(&self, document_id: &str) -> Result<Option<RegistryRecord>> {
        let row = sqlx::query("SELECT * FROM registry WHERE document_id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(reg_err)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn put(&self, record: &RegistryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO registry (document_id, status, chunk_count, fingerprint,
                                  updated_at, attempts, last_error)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                status = excluded.status,
                chunk_count = excluded.chunk_count,
                fingerprint = excluded.fingerprint,
                updated_at = excluded.updated_at,
                attempts = excluded.attempts,
                last_error = excluded.last_error
            "#,
        )
        .bind(&record.document_id)
        .bind(record.status.as_str())
        .bind(record.chunk_count as i64)
        .bind(&record.fingerprint)
        .bind(record.updated_at.to_rfc3339())
        .bind(record.attempts as i64)
        .bind(&record.last_error)
        .execute(&self.pool)
        .await
        .map_err(reg_err)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RegistryRecord>> {
        let rows = sqlx::query("SELECT * FROM registry ORDER BY document_id")
            .fetch_all(&self.pool)
            .await
            .map_err(reg_err)?;
        rows.iter().map(row_to_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_path;
    use crate::migrate::migrate;
    use lore_harness_core::chunk::{chunk_text, ChunkUnit, ChunkerConfig};
    use lore_harness_core::models::Document;

    async fn pool(dir: &tempfile::TempDir) -> SqlitePool {
        let pool = connect_path(&dir.path().join("lore.sqlite")).await.unwrap();
        migrate(&pool).await.unwrap();
        pool
    }

    fn entries(doc: &str, volume: &str) -> Vec<IndexEntry> {
        let cfg = ChunkerConfig {
            target_size: 3,
            overlap: 1,
            unit: ChunkUnit::Token,
        };
        chunk_text(doc, "one two three four five six seven", &cfg)
            .unwrap()
            .into_iter()
            .map(|c| {
                let v = vec![1.0, c.ordinal as f32, 0.5];
                IndexEntry::new(c, v, Some(volume.to_string()))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_sqlite_index_upsert_query_delete() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteIndex::new(pool(&dir).await, 3);

        let v1 = entries("V1.txt", "Volume 1");
        index.upsert(&v1).await.unwrap();
        index.upsert(&v1).await.unwrap();
        assert_eq!(index.count().await.unwrap(), v1.len());

        index.upsert(&entries("V2.txt", "Volume 2")).await.unwrap();
        let filter = QueryFilter::volume("V2");
        let hits = index.query(&[1.0, 0.0, 0.5], 10, Some(&filter)).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.entry.chunk.document_id == "V2.txt"));
        assert_eq!(hits[0].entry, entries("V2.txt", "Volume 2")[0]);

        let removed = index
            .replace_document("V2.txt", &entries("V2.txt", "Volume 2")[..1])
            .await
            .unwrap();
        assert_eq!(removed, v1.len());
        assert_eq!(index.count_for("V2.txt").await.unwrap(), 1);

        assert_eq!(index.delete("V1.txt").await.unwrap(), v1.len());
        assert_eq!(index.count_for("V1.txt").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_index_rejects_wrong_dims() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteIndex::new(pool(&dir).await, 4);
        let err = index.upsert(&entries("V1.txt", "Volume 1")).await.unwrap_err();
        assert!(matches!(err, HarnessError::DimensionMismatch { expected: 4, actual: 3 }));
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stored_dims_checked_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir).await;
        let index = SqliteIndex::new(pool.clone(), 3);
        index.upsert(&entries("V1.txt", "Volume 1")).await.unwrap();
        index.check_stored_dims().await.unwrap();

        let wider = SqliteIndex::new(pool, 8);
        let err = wider.check_stored_dims().await.unwrap_err();
        assert!(matches!(err, HarnessError::DimensionMismatch { expected: 8, actual: 3 }));
    }

    #[tokio::test]
    async fn test_sqlite_registry_persists_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let reg = SqliteRegistry::new(pool(&dir).await);
        let doc = Document::new("V1.txt", "text");

        let pending = RegistryRecord::begin(None, &doc).unwrap();
        reg.put(&pending).await.unwrap();
        let failed = pending.failed("embedding service unavailable").unwrap();
        reg.put(&failed).await.unwrap();

        let got = reg.get("V1.txt").await.unwrap().unwrap();
        assert_eq!(got.status, IngestStatus::Failed);
        assert_eq!(got.last_error.as_deref(), Some("embedding service unavailable"));

        let retry = RegistryRecord::begin(Some(&got), &doc).unwrap();
        assert_eq!(retry.attempts, 2);
        reg.put(&retry.embedded(3).unwrap()).await.unwrap();
        let records = reg.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, IngestStatus::Embedded);
        assert_eq!(records[0].chunk_count, 3);
        assert!(reg.get("missing").await.unwrap().is_none());
    }
}
