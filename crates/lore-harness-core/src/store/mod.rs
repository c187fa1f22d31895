//! Storage abstractions for Lore Harness.
//!
//! The [`VectorIndex`] trait is the only shared mutable resource between
//! ingestion and answering; the [`RegistryStore`] trait persists per-document
//! ingestion state. Both are object-safe and `Send + Sync` so backends can be
//! shared as `Arc<dyn ...>` across tasks.
//!
//! | Backend | Index | Registry |
//! |---------|-------|----------|
//! | in-memory ([`memory`]) | [`InMemoryIndex`](memory::InMemoryIndex) | [`InMemoryRegistry`](memory::InMemoryRegistry) |
//! | SQLite (app crate) | `SqliteIndex` | `SqliteRegistry` |

pub mod memory;

use async_trait::async_trait;

use crate::error::{HarnessError, Result};
use crate::models::{IndexEntry, QueryFilter, RegistryRecord, ScoredEntry};

/// Nearest-neighbor store of `(vector, chunk, metadata)` entries.
///
/// # Contract
///
/// - Every stored vector has length [`dims`](VectorIndex::dims); upserting or
///   querying with another length fails with
///   [`HarnessError::DimensionMismatch`] and writes nothing.
/// - Entries are keyed by chunk ID; re-upserting replaces, never duplicates.
/// - One `upsert` call is applied atomically: concurrent queries observe
///   either none or all of its entries.
/// - `query` ranks with [`crate::search::nearest`].
/// - `replace_document` swaps a document's whole entry set; backends that
///   can should do it atomically.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn dims(&self) -> usize;

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()>;

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<ScoredEntry>>;

    /// Remove every entry of `document_id`, returning how many were removed.
    async fn delete(&self, document_id: &str) -> Result<usize>;

    /// Replace every entry of `document_id` with `entries`, returning how
    /// many old entries were removed.
    async fn replace_document(&self, document_id: &str, entries: &[IndexEntry]) -> Result<usize> {
        check_dims(entries, self.dims())?;
        let removed = self.delete(document_id).await?;
        self.upsert(entries).await?;
        Ok(removed)
    }

    async fn count(&self) -> Result<usize>;

    async fn count_for(&self, document_id: &str) -> Result<usize>;
}

/// Durable mapping of document ID → [`RegistryRecord`].
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn get(&self, document_id: &str) -> Result<Option<RegistryRecord>>;

    async fn put(&self, record: &RegistryRecord) -> Result<()>;

    /// All records ordered by document ID.
    async fn list(&self) -> Result<Vec<RegistryRecord>>;
}

/// Reject any entry whose vector length differs from `dims`.
pub fn check_dims(entries: &[IndexEntry], dims: usize) -> Result<()> {
    match entries.iter().find(|e| e.vector().len() != dims) {
        Some(bad) => Err(HarnessError::DimensionMismatch {
            expected: dims,
            actual: bad.vector().len(),
        }),
        None => Ok(()),
    }
}

/// Reject a query vector whose length differs from `dims`.
pub fn check_query_dims(vector: &[f32], dims: usize) -> Result<()> {
    if vector.len() != dims {
        return Err(HarnessError::DimensionMismatch {
            expected: dims,
            actual: vector.len(),
        });
    }
    Ok(())
}
