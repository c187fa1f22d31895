//! Wiring: one SQLite pool shared by the registry and the vector index,
//! plus the configured gateways, assembled into pipeline, retriever and
//! agent.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::debug;

use lore_harness_core::embedding::EmbeddingGateway;
use lore_harness_core::llm::LlmGateway;
use lore_harness_core::store::{RegistryStore, VectorIndex};
use lore_harness_core::Result;

use crate::agent::{Agent, AgentSettings};
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::ingest::IngestPipeline;
use crate::llm::create_llm;
use crate::migrate::migrate;
use crate::retrieve::Retriever;
use crate::sqlite_store::{SqliteIndex, SqliteRegistry};

pub struct Harness {
    pub config: Config,
    pool: SqlitePool,
    index: Arc<SqliteIndex>,
    registry: Arc<SqliteRegistry>,
    embedder: Arc<dyn EmbeddingGateway>,
    llm: Arc<dyn LlmGateway>,
}

impl Harness {
    /// Connect, migrate, and build the gateways named in `config`.
    ///
    /// # Errors
    ///
    /// [`HarnessError::DimensionMismatch`](lore_harness_core::HarnessError::DimensionMismatch)
    /// when the index holds vectors of a different size than `embedding.dims`.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate(&pool).await?;

        let dims = config.embedding.dims.unwrap_or(0);
        let index = Arc::new(SqliteIndex::new(pool.clone(), dims));
        if config.embedding.is_enabled() {
            index.check_stored_dims().await?;
        }
        let registry = Arc::new(SqliteRegistry::new(pool.clone()));
        let embedder = create_embedder(config)?;
        let llm = create_llm(config)?;
        debug!(
            db = %config.db.path.display(),
            dims,
            embedder = ?config.embedding.provider,
            llm = ?config.llm.provider,
            "harness ready"
        );

        Ok(Self {
            config: config.clone(),
            pool,
            index,
            registry,
            embedder,
            llm,
        })
    }

    pub fn index(&self) -> Arc<dyn VectorIndex> {
        self.index.clone()
    }

    pub fn registry(&self) -> Arc<dyn RegistryStore> {
        self.registry.clone()
    }

    pub fn pipeline(&self) -> Result<IngestPipeline> {
        Ok(IngestPipeline::new(
            self.config.chunking.clone(),
            self.embedder.clone(),
            self.index(),
            self.registry(),
        )?
        .with_batch_size(self.config.embedding.batch_size)
        .with_policies(
            self.config.embedding.retry_policy(),
            self.config.db.retry_policy(),
        ))
    }

    pub fn retriever(&self) -> Arc<Retriever> {
        Arc::new(Retriever::new(
            self.embedder.clone(),
            self.index(),
            self.config.embedding.retry_policy(),
            self.config.db.retry_policy(),
        ))
    }

    pub fn agent(&self) -> Arc<Agent> {
        Arc::new(Agent::new(
            self.retriever(),
            self.llm.clone(),
            AgentSettings::from_config(&self.config),
        ))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Commands that embed text bail early when no provider is configured.
pub fn ensure_embeddings(config: &Config, command: &str) -> anyhow::Result<()> {
    if !config.embedding.is_enabled() {
        anyhow::bail!(
            "{} requires embeddings. Set [embedding] provider in config.",
            command
        );
    }
    Ok(())
}
