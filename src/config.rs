//! Configuration parsing and validation.
//!
//! Lore Harness is configured via a TOML file (default `config/lore.toml`).
//! Every section except `[db]` is optional and falls back to the defaults
//! below. A few environment variables override file values after parsing:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `OLLAMA_BASE_URL` | `embedding.url` and `llm.url` |
//! | `LLM_MODEL` | `llm.model` |
//! | `EMBEDDING_MODEL` | `embedding.model` |
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/lore.sqlite"
//!
//! [chunking]
//! target_size = 1000
//! overlap = 200
//! unit = "character"
//!
//! [embedding]
//! provider = "ollama"
//! model = "mxbai-embed-large"
//! dims = 1024
//!
//! [llm]
//! provider = "ollama"
//! model = "llama3.2:latest"
//!
//! [corpus]
//! root = "./novels"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lore_harness_core::chunk::ChunkerConfig;
use lore_harness_core::memory::MemoryBudget;
use lore_harness_core::tools::PlanLimits;
use lore_harness_core::{HarnessError, Result};

use crate::retry::RetryPolicy;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_db_retries")]
    pub max_retries: u32,
    #[serde(default = "default_db_timeout")]
    pub timeout_secs: u64,
}

impl DbConfig {
    /// Policy for registry and index calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.timeout_secs))
            .with_base_delay(Duration::from_millis(100))
    }
}

fn default_db_retries() -> u32 {
    2
}
fn default_db_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Disabled,
    Ollama,
    OpenAI,
    Hash,
    Local,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embed_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Disabled,
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_embed_retries(),
            timeout_secs: default_embed_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != EmbeddingProviderKind::Disabled
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.timeout_secs))
    }
}

fn default_batch_size() -> usize {
    64
}
fn default_embed_retries() -> u32 {
    5
}
fn default_embed_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    Disabled,
    Ollama,
    #[default]
    Extractive,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_summary_temperature")]
    pub summary_temperature: f32,
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::Extractive,
            model: None,
            url: None,
            temperature: default_temperature(),
            summary_temperature: default_summary_temperature(),
            num_ctx: default_num_ctx(),
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl LlmConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.timeout_secs))
    }
}

fn default_temperature() -> f32 {
    0.7
}
fn default_summary_temperature() -> f32 {
    0.3
}
fn default_num_ctx() -> u32 {
    8192
}
fn default_llm_retries() -> u32 {
    3
}
fn default_llm_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_volume_finder_k")]
    pub volume_finder_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            volume_finder_k: default_volume_finder_k(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_volume_finder_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_tokens: default_max_tokens(),
            session_ttl_secs: default_session_ttl(),
        }
    }
}

impl MemoryConfig {
    pub fn budget(&self) -> MemoryBudget {
        MemoryBudget {
            max_turns: self.max_turns,
            max_tokens: self.max_tokens,
        }
    }
}

fn default_max_turns() -> usize {
    20
}
fn default_max_tokens() -> usize {
    4000
}
fn default_session_ttl() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,
    #[serde(default = "default_true")]
    pub record_incomplete: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: default_max_tool_calls(),
            record_incomplete: true,
        }
    }
}

fn default_max_tool_calls() -> usize {
    4
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            root: default_corpus_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            concurrency: default_concurrency(),
        }
    }
}

fn default_corpus_root() -> PathBuf {
    PathBuf::from("./data/novels")
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
    ]
}
fn default_concurrency() -> usize {
    4
}

impl Config {
    /// Planner limits derived from `[retrieval]` and `[agent]`.
    pub fn plan_limits(&self) -> PlanLimits {
        PlanLimits {
            k: self.retrieval.k,
            volume_finder_k: self.retrieval.volume_finder_k,
            max_tool_calls: self.agent.max_tool_calls,
        }
    }

    /// Base URL for the embedding provider.
    pub fn embedding_url(&self) -> String {
        match (&self.embedding.url, self.embedding.provider) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, EmbeddingProviderKind::OpenAI) => DEFAULT_OPENAI_URL.to_string(),
            (None, _) => DEFAULT_OLLAMA_URL.to_string(),
        }
    }

    /// Base URL for the chat model.
    pub fn llm_url(&self) -> String {
        self.llm
            .url
            .as_deref()
            .unwrap_or(DEFAULT_OLLAMA_URL)
            .trim_end_matches('/')
            .to_string()
    }

    /// Apply `OLLAMA_BASE_URL`, `LLM_MODEL` and `EMBEDDING_MODEL`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("OLLAMA_BASE_URL").filter(|v| !v.is_empty()) {
            if self.embedding.provider == EmbeddingProviderKind::Ollama {
                self.embedding.url = Some(url.clone());
            }
            if self.llm.provider == LlmProviderKind::Ollama {
                self.llm.url = Some(url);
            }
        }
        if let Some(model) = lookup("LLM_MODEL").filter(|v| !v.is_empty()) {
            self.llm.model = Some(model);
        }
        if let Some(model) = lookup("EMBEDDING_MODEL").filter(|v| !v.is_empty()) {
            self.embedding.model = Some(model);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.memory.budget().validate()?;

        if self.retrieval.k == 0 || self.retrieval.volume_finder_k == 0 {
            return invalid("retrieval.k and retrieval.volume_finder_k must be >= 1");
        }
        if self.agent.max_tool_calls == 0 {
            return invalid("agent.max_tool_calls must be >= 1");
        }
        if self.corpus.concurrency == 0 {
            return invalid("corpus.concurrency must be >= 1");
        }
        if self.embedding.batch_size == 0 {
            return invalid("embedding.batch_size must be >= 1");
        }

        if self.embedding.is_enabled() && self.embedding.dims.unwrap_or(0) == 0 {
            return invalid(&format!(
                "embedding.dims must be > 0 when provider is '{:?}'",
                self.embedding.provider
            ));
        }
        if matches!(
            self.embedding.provider,
            EmbeddingProviderKind::Ollama | EmbeddingProviderKind::OpenAI | EmbeddingProviderKind::Local
        ) && self.embedding.model.is_none()
        {
            return invalid(&format!(
                "embedding.model must be specified when provider is '{:?}'",
                self.embedding.provider
            ));
        }
        if self.llm.provider == LlmProviderKind::Ollama && self.llm.model.is_none() {
            return invalid("llm.model must be specified when provider is 'ollama'");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature)
            || !(0.0..=2.0).contains(&self.llm.summary_temperature)
        {
            return invalid("llm temperatures must be in [0.0, 2.0]");
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> Result<()> {
    Err(HarnessError::InvalidConfig(msg.to_string()))
}

/// Parse and validate a config from TOML text, applying `lookup` overrides.
pub fn parse_config<F>(content: &str, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: Config = toml::from_str(content)
        .map_err(|e| HarnessError::InvalidConfig(format!("failed to parse config: {}", e)))?;
    config.apply_env(lookup);
    config.validate()?;
    Ok(config)
}

/// Load the config file at `path` with process environment overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        HarnessError::InvalidConfig(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&content, |k| std::env::var(k).ok())
}
