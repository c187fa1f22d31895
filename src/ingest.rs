//! Ingestion pipeline: Chunker → embedding gateway → vector index → registry.
//!
//! Per document, under a per-document lock:
//!
//! 1. Look up the registry record. `embedded` with the same fingerprint is a
//!    no-op unless forced.
//! 2. Mark the record `pending`.
//! 3. Chunk, then embed in batches of `embedding.batch_size` with backoff.
//! 4. Replace the document's entries in the index in one atomic step.
//! 5. Mark `embedded` with the chunk count. Any failure after step 2 marks
//!    the record `failed` instead.
//!
//! Nothing is written to the index until every chunk has a vector, so a
//! failed run leaves the previous entries intact.
//!
//! Documents are independent: [`IngestPipeline::ingest_all`] runs them with
//! bounded concurrency and reports each outcome separately.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use lore_harness_core::chunk::{chunk_document, ChunkerConfig};
use lore_harness_core::embedding::{check_batch, EmbeddingGateway};
use lore_harness_core::models::{Document, IndexEntry, IngestStatus, RegistryRecord};
use lore_harness_core::store::{RegistryStore, VectorIndex};
use lore_harness_core::{HarnessError, Result};

use crate::app::{ensure_embeddings, Harness};
use crate::config::Config;
use crate::loader::{canonical, document_id, load_file, scan_corpus, CorpusFile};
use crate::retry::{with_backoff, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Unchanged and already embedded.
    Skipped { chunks: usize },
    /// Indexed; `replaced` old entries were removed first.
    Embedded { chunks: usize, replaced: usize },
}

/// Result of ingesting one corpus file.
#[derive(Debug)]
pub struct IngestReport {
    pub document_id: String,
    pub result: Result<IngestOutcome>,
}

pub struct IngestPipeline {
    chunker: ChunkerConfig,
    embedder: Arc<dyn EmbeddingGateway>,
    index: Arc<dyn VectorIndex>,
    registry: Arc<dyn RegistryStore>,
    batch_size: usize,
    embed_policy: RetryPolicy,
    store_policy: RetryPolicy,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IngestPipeline {
    pub fn new(
        chunker: ChunkerConfig,
        embedder: Arc<dyn EmbeddingGateway>,
        index: Arc<dyn VectorIndex>,
        registry: Arc<dyn RegistryStore>,
    ) -> Result<Self> {
        chunker.validate()?;
        if embedder.dims() != index.dims() {
            return Err(HarnessError::DimensionMismatch {
                expected: index.dims(),
                actual: embedder.dims(),
            });
        }
        Ok(Self {
            chunker,
            embedder,
            index,
            registry,
            batch_size: 64,
            embed_policy: RetryPolicy::new(5, std::time::Duration::from_secs(30)),
            store_policy: RetryPolicy::new(2, std::time::Duration::from_secs(30)),
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_policies(mut self, embed: RetryPolicy, store: RetryPolicy) -> Self {
        self.embed_policy = embed;
        self.store_policy = store;
        self
    }

    /// Ingest one document. Idempotent: an unchanged, embedded document is
    /// skipped unless `force` is set.
    pub async fn ingest(&self, doc: &Document, force: bool) -> Result<IngestOutcome> {
        let lock = self.doc_lock(&doc.id)?;
        let result = {
            let _guard = lock.lock().await;
            self.ingest_locked(doc, force).await
        };
        self.release_lock(&doc.id, lock);
        result
    }

    async fn ingest_locked(&self, doc: &Document, force: bool) -> Result<IngestOutcome> {
        let mut current = self.get_record(&doc.id).await?;
        if let Some(rec) = &current {
            if !force && rec.status == IngestStatus::Embedded && rec.fingerprint == doc.fingerprint {
                debug!(document = %doc.id, chunks = rec.chunk_count, "unchanged, skipping");
                return Ok(IngestOutcome::Skipped {
                    chunks: rec.chunk_count,
                });
            }
            if rec.status == IngestStatus::Pending {
                // Left behind by an interrupted run.
                warn!(document = %doc.id, "found stale pending record");
                current = Some(rec.failed("interrupted before completion")?);
            }
        }

        let pending = RegistryRecord::begin(current.as_ref(), doc)?;
        self.put_record(&pending).await?;
        info!(
            document = %doc.id,
            attempt = pending.attempts,
            changed = current.is_some(),
            "ingesting"
        );

        match self.index_document(doc).await {
            Ok((chunks, replaced)) => {
                self.put_record(&pending.embedded(chunks)?).await?;
                info!(document = %doc.id, chunks, replaced, "embedded");
                Ok(IngestOutcome::Embedded { chunks, replaced })
            }
            Err(e) => {
                let failed = pending.failed(&e.to_string())?;
                if let Err(put_err) = self.put_record(&failed).await {
                    warn!(document = %doc.id, error = %put_err, "could not record failure");
                }
                warn!(document = %doc.id, error = %e, "ingestion failed");
                match e {
                    HarnessError::DimensionMismatch { .. } | HarnessError::InvalidConfig(_) => Err(e),
                    other => Err(HarnessError::IngestionFailed {
                        document: doc.id.clone(),
                        reason: other.to_string(),
                    }),
                }
            }
        }
    }

    /// Load and ingest one corpus file. Loading is retried under the store
    /// policy.
    pub async fn ingest_file(&self, file: &CorpusFile, force: bool) -> Result<IngestOutcome> {
        let doc = with_backoff(
            &self.store_policy,
            &format!("load {}", file.id),
            |reason| HarnessError::Load {
                path: "corpus file".to_string(),
                reason,
            },
            || {
                let owned = file.clone();
                async move {
                    let path = owned.path.display().to_string();
                    tokio::task::spawn_blocking(move || load_file(&owned))
                        .await
                        .map_err(|e| HarnessError::Load {
                            path,
                            reason: format!("loader task failed: {}", e),
                        })?
                }
            },
        )
        .await?;
        self.ingest(&doc, force).await
    }

    /// Ingest every file with at most `concurrency` documents in flight.
    /// Reports come back sorted by document ID.
    pub async fn ingest_all(
        &self,
        files: &[CorpusFile],
        force: bool,
        concurrency: usize,
    ) -> Vec<IngestReport> {
        let mut reports: Vec<IngestReport> = stream::iter(files)
            .map(|file| async move {
                IngestReport {
                    document_id: file.id.clone(),
                    result: self.ingest_file(file, force).await,
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
        reports.sort_by(|a, b| a.document_id.cmp(&b.document_id));
        reports
    }

    /// All registry records, ordered by document ID.
    pub async fn records(&self) -> Result<Vec<RegistryRecord>> {
        with_backoff(
            &self.store_policy,
            "registry list",
            HarnessError::RegistryUnavailable,
            || self.registry.list(),
        )
        .await
    }

    async fn index_document(&self, doc: &Document) -> Result<(usize, usize)> {
        let chunks = chunk_document(doc, &self.chunker)?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            let batch_vectors = with_backoff(
                &self.embed_policy,
                "embed batch",
                HarnessError::EmbeddingUnavailable,
                || self.embedder.embed_batch(batch),
            )
            .await?;
            check_batch(&batch_vectors, batch.len(), self.embedder.dims())?;
            debug!(document = %doc.id, batch = i, size = batch.len(), "embedded batch");
            vectors.extend(batch_vectors);
        }

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry::new(chunk, vector, doc.volume.clone()))
            .collect();
        let count = entries.len();

        let replaced = with_backoff(
            &self.store_policy,
            "index replace",
            HarnessError::VectorStoreUnavailable,
            || self.index.replace_document(&doc.id, &entries),
        )
        .await?;
        Ok((count, replaced))
    }

    async fn get_record(&self, id: &str) -> Result<Option<RegistryRecord>> {
        with_backoff(
            &self.store_policy,
            "registry get",
            HarnessError::RegistryUnavailable,
            || self.registry.get(id),
        )
        .await
    }

    async fn put_record(&self, record: &RegistryRecord) -> Result<()> {
        with_backoff(
            &self.store_policy,
            "registry put",
            HarnessError::RegistryUnavailable,
            || self.registry.put(record),
        )
        .await
    }

    fn doc_lock(&self, id: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| HarnessError::RegistryUnavailable("lock table poisoned".to_string()))?;
        Ok(locks.entry(id.to_string()).or_default().clone())
    }

    /// Drop the table entry once no other ingest holds or awaits the lock.
    fn release_lock(&self, id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        // Clones are only made under the table lock: ours plus the table's.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(id);
        }
    }
}

/// Files named by an `ingest` argument: one file, a directory under the
/// corpus, or the whole corpus. IDs are always relative to the corpus root.
pub fn resolve_files(config: &Config, path: Option<&Path>) -> Result<Vec<CorpusFile>> {
    let root = canonical(&config.corpus.root);
    match path {
        None => scan_corpus(&config.corpus),
        Some(p) if p.is_file() => Ok(vec![CorpusFile {
            path: canonical(p),
            id: document_id(&root, p),
        }]),
        Some(p) => {
            let mut corpus = config.corpus.clone();
            corpus.root = p.to_path_buf();
            Ok(scan_corpus(&corpus)?
                .into_iter()
                .map(|f| CorpusFile {
                    id: if f.path.starts_with(&root) {
                        document_id(&root, &f.path)
                    } else {
                        f.id
                    },
                    path: f.path,
                })
                .collect())
        }
    }
}

/// Run the ingest command against the configured database.
pub async fn run_ingest(config: &Config, path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    ensure_embeddings(config, "ingest")?;
    let harness = Harness::open(config).await?;
    let result = ingest_and_print(&harness, path, force).await;
    harness.close().await;
    result
}

/// Ingest and print one line per document. Per-document failures are
/// reported and left for the next run; only configuration errors bail.
pub async fn ingest_and_print(harness: &Harness, path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let files = resolve_files(&harness.config, path)
        .with_context(|| {
            let shown = path.unwrap_or(harness.config.corpus.root.as_path());
            format!("cannot list {}", shown.display())
        })?;
    let pipeline = harness.pipeline()?;

    println!("ingest {} document(s)", files.len());
    let reports = pipeline
        .ingest_all(&files, force, harness.config.corpus.concurrency)
        .await;

    let (mut embedded, mut skipped, mut failed) = (0, 0, 0);
    let mut fatal = None;
    for report in reports {
        match report.result {
            Ok(IngestOutcome::Embedded { chunks, replaced }) => {
                embedded += 1;
                println!(
                    "  {}: embedded {} chunk(s), replaced {}",
                    report.document_id, chunks, replaced
                );
            }
            Ok(IngestOutcome::Skipped { chunks }) => {
                skipped += 1;
                println!("  {}: unchanged ({} chunks)", report.document_id, chunks);
            }
            Err(e) => {
                failed += 1;
                println!("  {}: failed: {}", report.document_id, e);
                let is_config = matches!(
                    e,
                    HarnessError::DimensionMismatch { .. } | HarnessError::InvalidConfig(_)
                );
                if is_config && fatal.is_none() {
                    fatal = Some(e);
                }
            }
        }
    }

    println!("  embedded: {}", embedded);
    println!("  unchanged: {}", skipped);
    println!("  failed: {}", failed);
    if let Some(e) = fatal {
        return Err(anyhow::Error::new(e).context("ingest aborted by configuration error"));
    }
    println!("ok");
    Ok(())
}
