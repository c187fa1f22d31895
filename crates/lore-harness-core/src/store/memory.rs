//! In-memory [`VectorIndex`] and [`RegistryStore`] for tests and demos.
//!
//! Entries live in a `BTreeMap` keyed by chunk ID behind `std::sync::RwLock`,
//! so one upsert or delete is applied under a single write guard. Queries are
//! brute-force cosine similarity over all stored vectors.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{HarnessError, Result};
use crate::models::{IndexEntry, QueryFilter, RegistryRecord, ScoredEntry};
use crate::search::nearest;

use super::{check_dims, check_query_dims, RegistryStore, VectorIndex};

fn poisoned(what: &str) -> HarnessError {
    HarnessError::VectorStoreUnavailable(format!("{} lock poisoned", what))
}

/// In-memory vector index.
pub struct InMemoryIndex {
    dims: usize,
    entries: RwLock<BTreeMap<String, IndexEntry>>,
}

impl InMemoryIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Snapshot of every entry, ordered by chunk ID.
    pub fn entries(&self) -> Result<Vec<IndexEntry>> {
        let guard = self.entries.read().map_err(|_| poisoned("index"))?;
        Ok(guard.values().cloned().collect())
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        check_dims(entries, self.dims)?;
        let mut guard = self.entries.write().map_err(|_| poisoned("index"))?;
        for e in entries {
            guard.insert(e.chunk_id().to_string(), e.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<ScoredEntry>> {
        check_query_dims(vector, self.dims)?;
        let guard = self.entries.read().map_err(|_| poisoned("index"))?;
        Ok(nearest(guard.values(), vector, k, filter))
    }

    async fn delete(&self, document_id: &str) -> Result<usize> {
        let mut guard = self.entries.write().map_err(|_| poisoned("index"))?;
        let before = guard.len();
        guard.retain(|_, e| e.chunk.document_id != document_id);
        Ok(before - guard.len())
    }

    async fn replace_document(&self, document_id: &str, entries: &[IndexEntry]) -> Result<usize> {
        check_dims(entries, self.dims)?;
        let mut guard = self.entries.write().map_err(|_| poisoned("index"))?;
        let before = guard.len();
        guard.retain(|_, e| e.chunk.document_id != document_id);
        let removed = before - guard.len();
        for e in entries {
            guard.insert(e.chunk_id().to_string(), e.clone());
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<usize> {
        let guard = self.entries.read().map_err(|_| poisoned("index"))?;
        Ok(guard.len())
    }

    async fn count_for(&self, document_id: &str) -> Result<usize> {
        let guard = self.entries.read().map_err(|_| poisoned("index"))?;
        Ok(guard
            .values()
            .filter(|e| e.chunk.document_id == document_id)
            .count())
    }
}

/// In-memory ingestion registry.
#[derive(Default)]
pub struct InMemoryRegistry {
    records: RwLock<BTreeMap<String, RegistryRecord>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

fn registry_poisoned() -> HarnessError {
    HarnessError::RegistryUnavailable("registry lock poisoned".to_string())
}

#[async_trait]
impl RegistryStore for InMemoryRegistry {
    async fn get(&self, document_id: &str) -> Result<Option<RegistryRecord>> {
        let guard = self.records.read().map_err(|_| registry_poisoned())?;
        Ok(guard.get(document_id).cloned())
    }

    async fn put(&self, record: &RegistryRecord) -> Result<()> {
        let mut guard = self.records.write().map_err(|_| registry_poisoned())?;
        guard.insert(record.document_id.clone(), record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RegistryRecord>> {
        let guard = self.records.read().map_err(|_| registry_poisoned())?;
        Ok(guard.values().cloned().collect())
    }
}
