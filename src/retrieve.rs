//! Query-time retrieval: embed a question, ask the index for neighbors.
//!
//! The retriever never writes. An empty index short-circuits to an empty
//! result without calling the embedding model, so a fresh install can answer
//! "nothing found" even with embeddings disabled.

use std::sync::Arc;

use tracing::debug;

use lore_harness_core::embedding::{check_batch, EmbeddingGateway};
use lore_harness_core::models::{Chunk, QueryFilter, ScoredEntry};
use lore_harness_core::store::VectorIndex;
use lore_harness_core::{HarnessError, Result};

use crate::retry::{with_backoff, RetryPolicy};

pub struct Retriever {
    embedder: Arc<dyn EmbeddingGateway>,
    index: Arc<dyn VectorIndex>,
    embed_policy: RetryPolicy,
    store_policy: RetryPolicy,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingGateway>,
        index: Arc<dyn VectorIndex>,
        embed_policy: RetryPolicy,
        store_policy: RetryPolicy,
    ) -> Self {
        Self {
            embedder,
            index,
            embed_policy,
            store_policy,
        }
    }

    /// Top-`k` chunks for `query`, most similar first.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<Chunk>> {
        Ok(self
            .retrieve_scored(query, k, filter)
            .await?
            .into_iter()
            .map(|s| s.entry.chunk)
            .collect())
    }

    /// Like [`retrieve`](Self::retrieve) but keeps scores and metadata.
    pub async fn retrieve_scored(
        &self,
        query: &str,
        k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<ScoredEntry>> {
        if query.trim().is_empty() || k == 0 || self.is_empty().await? {
            return Ok(Vec::new());
        }
        let mut vectors = self.embed_queries(&[query.to_string()]).await?;
        let vector = vectors.pop().ok_or_else(|| {
            HarnessError::EmbeddingUnavailable("no vector returned for query".to_string())
        })?;
        self.search_vector(&vector, k, filter).await
    }

    /// Embed several queries in one gateway call.
    pub async fn embed_queries(&self, queries: &[String]) -> Result<Vec<Vec<f32>>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = with_backoff(
            &self.embed_policy,
            "embed query",
            HarnessError::EmbeddingUnavailable,
            || self.embedder.embed_batch(queries),
        )
        .await?;
        check_batch(&vectors, queries.len(), self.embedder.dims())?;
        Ok(vectors)
    }

    /// Nearest neighbors of an already-embedded query.
    pub async fn search_vector(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<ScoredEntry>> {
        let results = with_backoff(
            &self.store_policy,
            "index query",
            HarnessError::VectorStoreUnavailable,
            || self.index.query(vector, k, filter),
        )
        .await?;
        debug!(k, hits = results.len(), filtered = filter.is_some(), "index query");
        Ok(results)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        let n = with_backoff(
            &self.store_policy,
            "index count",
            HarnessError::VectorStoreUnavailable,
            || self.index.count(),
        )
        .await?;
        Ok(n == 0)
    }
}
