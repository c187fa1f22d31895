//! Chat-model gateway implementations.
//!
//! | Config Value | Gateway |
//! |-------------|---------|
//! | `"ollama"` | [`OllamaLlm`]: `POST {url}/api/chat`, NDJSON streaming |
//! | `"extractive"` | [`ExtractiveLlm`]: offline, quotes the retrieved passages |
//! | `"disabled"` | [`DisabledLlm`]: every call fails |
//!
//! Like the embedding gateways, each call makes one request and classifies
//! failures; retrying belongs to the caller.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use lore_harness_core::llm::{FragmentStream, LlmGateway, LlmRequest};
use lore_harness_core::search::SOURCE_SEPARATOR;
use lore_harness_core::{HarnessError, Result};

use crate::config::{Config, LlmProviderKind};
use crate::prompt::{split_sections, NO_CONTEXT};
use crate::retry::http_failure;

/// Answer given when the context holds nothing relevant.
pub const NOT_FOUND_ANSWER: &str = "I couldn't find this information in the available volumes.";

// ============ Disabled ============

pub struct DisabledLlm;

#[async_trait]
impl LlmGateway for DisabledLlm {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &LlmRequest) -> Result<String> {
        Err(HarnessError::LlmUnavailable(
            "LLM provider is disabled; set [llm].provider in the config".to_string(),
        ))
    }
}

// ============ Ollama ============

/// Chat model served by Ollama.
pub struct OllamaLlm {
    client: reqwest::Client,
    url: String,
    model: String,
    num_ctx: u32,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChatChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChunkMessage {
    #[serde(default)]
    content: String,
}

impl OllamaLlm {
    pub fn new(url: impl Into<String>, model: impl Into<String>, num_ctx: u32) -> Result<Self> {
        // No overall request timeout: streamed answers can run long. The
        // caller puts a deadline on each call and on each streamed fragment.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| HarnessError::InvalidConfig(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            model: model.into(),
            num_ctx,
        })
    }

    fn body(&self, request: &LlmRequest, stream: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
            "options": {
                "temperature": request.temperature,
                "num_ctx": self.num_ctx,
            },
        })
    }

    async fn send(&self, request: &LlmRequest, stream: bool) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&self.body(request, stream))
            .send()
            .await
            .map_err(|e| {
                HarnessError::LlmUnavailable(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(http_failure(HarnessError::LlmUnavailable, "Ollama", status, &text));
        }
        Ok(response)
    }
}

/// Parse one NDJSON line of an Ollama chat response.
fn parse_chat_line(line: &[u8]) -> Result<Option<(String, bool)>> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let chunk: ChatChunk = serde_json::from_str(line)
        .map_err(|e| HarnessError::LlmUnavailable(format!("bad Ollama response: {}", e)))?;
    if let Some(err) = chunk.error {
        return Err(HarnessError::LlmUnavailable(format!("Ollama error: {}", err)));
    }
    let content = chunk.message.map(|m| m.content).unwrap_or_default();
    Ok(Some((content, chunk.done)))
}

/// Decode an NDJSON chat body into fragments on `tx`. A body that ends
/// before a `done: true` line yields a trailing error.
async fn forward_chat_stream<S, B, E>(body: S, tx: mpsc::Sender<Result<String>>)
where
    S: futures::Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut buf: Vec<u8> = Vec::new();
    let mut finished = false;
    loop {
        let line = match buf.iter().position(|b| *b == b'\n') {
            Some(pos) => buf.drain(..=pos).collect::<Vec<u8>>(),
            None if finished => std::mem::take(&mut buf),
            None => {
                match body.next().await {
                    Some(Ok(bytes)) => buf.extend_from_slice(bytes.as_ref()),
                    Some(Err(e)) => {
                        let _ = tx
                            .send(Err(HarnessError::LlmUnavailable(format!(
                                "Ollama stream interrupted: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                    None => finished = true,
                }
                continue;
            }
        };

        match parse_chat_line(&line) {
            Ok(Some((content, done))) => {
                if !content.is_empty() && tx.send(Ok(content)).await.is_err() {
                    // Receiver dropped.
                    return;
                }
                if done {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
        if finished && buf.is_empty() {
            let _ = tx
                .send(Err(HarnessError::LlmUnavailable(
                    "Ollama stream ended before done".to_string(),
                )))
                .await;
            return;
        }
    }
}

#[async_trait]
impl LlmGateway for OllamaLlm {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &LlmRequest) -> Result<String> {
        let response = self.send(request, false).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| HarnessError::LlmUnavailable(format!("Ollama read error: {}", e)))?;
        match parse_chat_line(&bytes)? {
            Some((content, _)) => Ok(content),
            None => Err(HarnessError::LlmUnavailable(
                "empty Ollama response".to_string(),
            )),
        }
    }

    async fn stream(&self, request: &LlmRequest) -> Result<FragmentStream> {
        let response = self.send(request, true).await?;
        let (tx, rx) = mpsc::channel::<Result<String>>(32);
        tokio::spawn(forward_chat_stream(response.bytes_stream(), tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

// ============ Extractive ============

/// Offline model that answers by quoting the best-matching sentences of the
/// context in the prompt. Deterministic; used for tests and when no chat
/// model is available.
pub struct ExtractiveLlm {
    max_sentences: usize,
}

impl Default for ExtractiveLlm {
    fn default() -> Self {
        Self { max_sentences: 3 }
    }
}

impl ExtractiveLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the answer for a prompt assembled by [`crate::prompt`].
    pub fn answer(&self, prompt: &str) -> String {
        let Some((context, question)) = split_sections(prompt) else {
            return NOT_FOUND_ANSWER.to_string();
        };
        if context.is_empty() || context == NO_CONTEXT {
            return NOT_FOUND_ANSWER.to_string();
        }

        let terms = key_terms(question);
        let mut candidates: Vec<(usize, usize, String, String)> = Vec::new();
        for block in context.split(SOURCE_SEPARATOR) {
            let (label, body) = split_source(block);
            for sentence in sentences(body) {
                let score = overlap(&terms, sentence);
                candidates.push((score, candidates.len(), label.clone(), sentence.to_string()));
            }
        }
        if candidates.is_empty() {
            return NOT_FOUND_ANSWER.to_string();
        }

        let mut best: Vec<&(usize, usize, String, String)> =
            candidates.iter().filter(|c| c.0 > 0).collect();
        if best.is_empty() && terms.is_empty() {
            // Summaries and vague questions: lead with the opening sentences.
            best = candidates.iter().collect();
        }
        if best.is_empty() {
            return NOT_FOUND_ANSWER.to_string();
        }
        best.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        best.truncate(self.max_sentences);
        best.sort_by_key(|c| c.1);

        let lines: Vec<String> = best
            .iter()
            .map(|(_, _, label, sentence)| {
                if label.is_empty() {
                    format!("- {}", sentence)
                } else {
                    format!("- {} ({})", sentence, label)
                }
            })
            .collect();
        format!("From the retrieved passages:\n{}", lines.join("\n"))
    }
}

#[async_trait]
impl LlmGateway for ExtractiveLlm {
    fn model_name(&self) -> &str {
        "extractive"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<String> {
        let prompt = request.last_user().unwrap_or_default();
        let answer = self.answer(prompt);
        debug!(chars = answer.len(), "extractive answer");
        Ok(answer)
    }
}

const STOPWORDS: &[&str] = &[
    "the", "and", "what", "who", "whom", "where", "when", "why", "how", "does", "did", "was",
    "were", "are", "is", "for", "with", "about", "that", "this", "from", "into", "his", "her",
    "their", "they", "them", "has", "have", "had", "which", "tell", "happened", "happen", "can",
    "you", "volume", "vol", "novel", "novels", "story",
];

fn key_terms(question: &str) -> HashSet<String> {
    question
        .split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

fn overlap(terms: &HashSet<String>, sentence: &str) -> usize {
    let words: HashSet<String> = sentence
        .split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .collect();
    terms.iter().filter(|t| words.contains(*t)).count()
}

/// Split a `[Source i: label]` block into its label and body. Tool headers
/// such as `[search_novels]` and `Found in:` lines are skipped.
fn split_source(block: &str) -> (String, &str) {
    let mut label = String::new();
    let mut body_start = 0;
    for line in block.split_inclusive('\n') {
        let t = line.trim();
        if !t.is_empty() && !is_header(t) {
            break;
        }
        if let Some(rest) = t.strip_prefix("[Source ") {
            if let Some((_, l)) = rest.trim_end_matches(']').split_once(": ") {
                label = l.to_string();
            }
        }
        body_start += line.len();
    }
    (label, &block[body_start..])
}

fn is_header(line: &str) -> bool {
    (line.starts_with('[') && line.ends_with(']'))
        || line.starts_with("Found in:")
        || line.starts_with("Passages in story order")
}

fn sentences(body: &str) -> impl Iterator<Item = &str> {
    body.split_inclusive(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !is_header(s) && s.chars().filter(|c| c.is_alphanumeric()).count() >= 3)
}

/// Build the configured chat model.
pub fn create_llm(config: &Config) -> Result<Arc<dyn LlmGateway>> {
    match config.llm.provider {
        LlmProviderKind::Disabled => Ok(Arc::new(DisabledLlm)),
        LlmProviderKind::Extractive => Ok(Arc::new(ExtractiveLlm::new())),
        LlmProviderKind::Ollama => {
            let model = config.llm.model.clone().ok_or_else(|| {
                HarnessError::InvalidConfig("llm.model must be specified".to_string())
            })?;
            Ok(Arc::new(OllamaLlm::new(
                config.llm_url(),
                model,
                config.llm.num_ctx,
            )?))
        }
    }
}
