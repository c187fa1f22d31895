//! LLM gateway trait.
//!
//! The agent talks to a chat model only through [`LlmGateway`]. A request is
//! an ordered list of [`ChatMessage`]s plus a sampling temperature; the
//! response is either the whole answer or a lazy [`FragmentStream`].

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Role;

/// Lazy sequence of answer fragments. Ends after the last fragment or the
/// first error.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

impl LlmRequest {
    pub fn new(messages: Vec<ChatMessage>, temperature: f32) -> Self {
        Self {
            messages,
            temperature,
        }
    }

    /// Content of the last user message, if any.
    pub fn last_user(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Chat-completion service.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, request: &LlmRequest) -> Result<String>;

    /// Stream the answer as fragments.
    ///
    /// The default implementation completes the whole answer and then
    /// yields it word by word.
    async fn stream(&self, request: &LlmRequest) -> Result<FragmentStream> {
        let text = self.complete(request).await?;
        Ok(fragments(&text))
    }
}

/// Split `text` into whitespace-preserving fragments and wrap them as a stream.
pub fn fragments(text: &str) -> FragmentStream {
    let pieces: Vec<Result<String>> = text
        .split_inclusive(char::is_whitespace)
        .map(|s| Ok(s.to_string()))
        .collect();
    Box::pin(stream::iter(pieces))
}
