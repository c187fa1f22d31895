//! Embedding gateway implementations.
//!
//! Concrete [`EmbeddingGateway`] backends selected by `[embedding].provider`:
//!
//! | Config Value | Gateway |
//! |-------------|---------|
//! | `"disabled"` | [`DisabledEmbedder`]: every call fails |
//! | `"ollama"` | [`OllamaEmbedder`]: `POST {url}/api/embed` |
//! | `"openai"` | [`OpenAIEmbedder`]: `POST {url}/v1/embeddings`, needs `OPENAI_API_KEY` |
//! | `"hash"` | [`HashEmbedder`]: offline feature hashing |
//! | `"local"` | `LocalEmbedder`: fastembed, behind the `local-embeddings` feature |
//!
//! Gateways make exactly one request per call and classify failures:
//! HTTP 429, 5xx and transport errors are `EmbeddingUnavailable`
//! (retryable), other statuses are `InvalidConfig`. Retrying is the
//! caller's job (see [`crate::retry`]). Every response is checked for one
//! vector per input of the configured dimensionality.
//!
//! ```rust,no_run
//! # use lore_harness::config::parse_config;
//! # use lore_harness::embedding::create_embedder;
//! let config = parse_config("[db]\npath = \"x\"\n", |_| None).unwrap();
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use lore_harness_core::embedding::{check_batch, EmbeddingGateway};
use lore_harness_core::{HarnessError, Result};

pub use lore_harness_core::embedding::HashEmbedder;

use crate::config::{Config, EmbeddingProviderKind};
use crate::retry::http_failure;

// ============ Disabled ============

/// Gateway used when `embedding.provider = "disabled"`.
pub struct DisabledEmbedder {
    dims: usize,
}

impl DisabledEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl EmbeddingGateway for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(HarnessError::EmbeddingUnavailable(
            "embedding provider is disabled; set [embedding].provider in the config".to_string(),
        ))
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| HarnessError::InvalidConfig(format!("cannot build HTTP client: {}", e)))
}

// ============ Ollama ============

/// Gateway backed by a local Ollama instance.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(url: impl Into<String>, model: impl Into<String>, dims: usize, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            url: url.into(),
            model: model.into(),
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingGateway for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                HarnessError::EmbeddingUnavailable(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(http_failure(
                HarnessError::EmbeddingUnavailable,
                "Ollama",
                status,
                &text,
            ));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| HarnessError::EmbeddingUnavailable(format!("bad Ollama response: {}", e)))?;
        let vectors = parse_ollama_response(&json)?;
        check_batch(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            HarnessError::EmbeddingUnavailable(
                "invalid Ollama response: missing embeddings array".to_string(),
            )
        })?;

    embeddings
        .iter()
        .map(|e| {
            let values = e.as_array().ok_or_else(|| {
                HarnessError::EmbeddingUnavailable(
                    "invalid Ollama response: embedding is not an array".to_string(),
                )
            })?;
            to_f32(values, "Ollama")
        })
        .collect()
}

// ============ OpenAI ============

/// Gateway backed by the OpenAI embeddings API.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    api_key: String,
}

impl OpenAIEmbedder {
    /// # Errors
    ///
    /// [`HarnessError::InvalidConfig`] if `OPENAI_API_KEY` is not set.
    pub fn new(url: impl Into<String>, model: impl Into<String>, dims: usize, timeout_secs: u64) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            HarnessError::InvalidConfig("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self {
            client: http_client(timeout_secs)?,
            url: url.into(),
            model: model.into(),
            dims,
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingGateway for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| HarnessError::EmbeddingUnavailable(format!("OpenAI request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(http_failure(
                HarnessError::EmbeddingUnavailable,
                "OpenAI",
                status,
                &text,
            ));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| HarnessError::EmbeddingUnavailable(format!("bad OpenAI response: {}", e)))?;
        let vectors = parse_openai_response(&json)?;
        check_batch(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
        HarnessError::EmbeddingUnavailable("invalid OpenAI response: missing data array".to_string())
    })?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                HarnessError::EmbeddingUnavailable(
                    "invalid OpenAI response: missing embedding".to_string(),
                )
            })?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, to_f32(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn to_f32(values: &[serde_json::Value], service: &str) -> Result<Vec<f32>> {
    values
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                HarnessError::EmbeddingUnavailable(format!(
                    "invalid {} response: non-numeric vector component {}",
                    service, v
                ))
            })
        })
        .collect()
}

// ============ Local (fastembed) ============

/// Gateway running a fastembed model in-process.
///
/// `TextEmbedding::embed` needs `&mut self`, so the model sits behind a
/// mutex and runs on the blocking pool.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    pub fn new(model_name: &str, dims: usize, batch_size: usize) -> Result<Self> {
        let which = match model_name {
            "all-minilm-l6-v2" => fastembed::EmbeddingModel::AllMiniLML6V2,
            "bge-small-en-v1.5" => fastembed::EmbeddingModel::BGESmallENV15,
            "bge-base-en-v1.5" => fastembed::EmbeddingModel::BGEBaseENV15,
            "bge-large-en-v1.5" => fastembed::EmbeddingModel::BGELargeENV15,
            "nomic-embed-text-v1.5" => fastembed::EmbeddingModel::NomicEmbedTextV15,
            "mxbai-embed-large-v1" => fastembed::EmbeddingModel::MxbaiEmbedLargeV1,
            other => {
                return Err(HarnessError::InvalidConfig(format!(
                    "unknown local embedding model '{}'",
                    other
                )))
            }
        };
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(which).with_show_download_progress(true),
        )
        .map_err(|e| {
            HarnessError::EmbeddingUnavailable(format!("failed to initialize local model: {}", e))
        })?;
        Ok(Self {
            model_name: model_name.to_string(),
            dims,
            batch_size,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl EmbeddingGateway for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let inputs = texts.to_vec();
        let vectors = tokio::task::spawn_blocking(move || {
            let mut guard = model.lock().map_err(|_| {
                HarnessError::EmbeddingUnavailable("local model lock poisoned".to_string())
            })?;
            guard
                .embed(inputs, Some(batch_size))
                .map_err(|e| HarnessError::EmbeddingUnavailable(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| HarnessError::EmbeddingUnavailable(format!("embedding task failed: {}", e)))??;
        check_batch(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

/// Build the gateway selected by `[embedding]`.
///
/// # Errors
///
/// [`HarnessError::InvalidConfig`] when the provider cannot be initialized
/// (missing model/dims, missing API key, or `local` without the
/// `local-embeddings` feature).
pub fn create_embedder(config: &Config) -> Result<Arc<dyn EmbeddingGateway>> {
    let e = &config.embedding;
    let dims = e.dims.unwrap_or(0);
    let model = || {
        e.model.clone().ok_or_else(|| {
            HarnessError::InvalidConfig("embedding.model must be specified".to_string())
        })
    };

    match e.provider {
        EmbeddingProviderKind::Disabled => Ok(Arc::new(DisabledEmbedder::new(dims))),
        EmbeddingProviderKind::Hash => Ok(Arc::new(HashEmbedder::new(dims)?)),
        EmbeddingProviderKind::Ollama => Ok(Arc::new(OllamaEmbedder::new(
            config.embedding_url(),
            model()?,
            dims,
            e.timeout_secs,
        )?)),
        EmbeddingProviderKind::OpenAI => Ok(Arc::new(OpenAIEmbedder::new(
            config.embedding_url(),
            model()?,
            dims,
            e.timeout_secs,
        )?)),
        #[cfg(feature = "local-embeddings")]
        EmbeddingProviderKind::Local => {
            Ok(Arc::new(LocalEmbedder::new(&model()?, dims, e.batch_size)?))
        }
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingProviderKind::Local => Err(HarnessError::InvalidConfig(
            "local embedding provider requires --features local-embeddings".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({"embeddings": [[0.1, 0.2], [0.3, 0.4]]});
        let v = parse_ollama_response(&json).unwrap();
        assert_eq!(v.len(), 2);
        assert!((v[1][0] - 0.3).abs() < 1e-6);
        assert!(parse_ollama_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_non_numeric_component_rejected() {
        let ollama = serde_json::json!({"embeddings": [[0.1, "x"]]});
        assert!(matches!(
            parse_ollama_response(&ollama),
            Err(HarnessError::EmbeddingUnavailable(m)) if m.contains("non-numeric")
        ));
        let openai = serde_json::json!({"data": [{"index": 0, "embedding": [1.0, null]}]});
        assert!(matches!(
            parse_openai_response(&openai),
            Err(HarnessError::EmbeddingUnavailable(m)) if m.contains("non-numeric")
        ));
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({"data": [
            {"index": 1, "embedding": [2.0]},
            {"index": 0, "embedding": [1.0]}
        ]});
        let v = parse_openai_response(&json).unwrap();
        assert_eq!(v, vec![vec![1.0], vec![2.0]]);
    }

    #[tokio::test]
    async fn test_disabled_fails() {
        let config = parse_config("[db]\npath = \"x\"\n", |_| None).unwrap();
        let embedder = create_embedder(&config).unwrap();
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, HarnessError::EmbeddingUnavailable(_)));
    }

    #[tokio::test]
    async fn test_hash_provider_from_config() {
        let config = parse_config(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"hash\"\ndims = 32\n",
            |_| None,
        )
        .unwrap();
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dims(), 32);
        assert_eq!(embedder.embed("storm").await.unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_ollama_unreachable_is_retryable() {
        let embedder = OllamaEmbedder::new("http://127.0.0.1:9", "m", 4, 2).unwrap();
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
