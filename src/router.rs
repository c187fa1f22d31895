//! Tool Router: executes a [`Plan`] for one question.
//!
//! 1. Build the plan with [`plan`] (deterministic, budget-bounded).
//! 2. Embed the distinct retrieval queries in one gateway call.
//! 3. Run the retrieval calls concurrently.
//! 4. If no retrieval call succeeded and budget remains, fall back to a
//!    direct Retriever call.
//! 5. Run the Summarizer over the successful outputs, if planned.
//!
//! A failed tool becomes a `success = false` entry in the trace; it never
//! aborts the turn.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use lore_harness_core::llm::LlmGateway;
use lore_harness_core::models::{ConversationTurn, Role, ToolInvocation};
use lore_harness_core::tools::{plan, PlanLimits, Tool, ToolCall};
use lore_harness_core::HarnessError;

use crate::prompt::{summary_request, tool_context};
use crate::retrieve::Retriever;
use crate::retry::{with_backoff, RetryPolicy};

/// What the router gathered for one question.
#[derive(Debug, Clone, Default)]
pub struct RouteOutcome {
    pub trace: Vec<ToolInvocation>,
    /// Successful tool outputs joined for the answer prompt.
    pub context: String,
    /// Set when the plan was cut to fit the call budget.
    pub budget_exceeded: Option<usize>,
}

impl RouteOutcome {
    pub fn succeeded(&self) -> usize {
        self.trace.iter().filter(|t| t.success).count()
    }
}

pub struct ToolRouter {
    retriever: Arc<Retriever>,
    llm: Arc<dyn LlmGateway>,
    limits: PlanLimits,
    summary_temperature: f32,
    llm_policy: RetryPolicy,
}

impl ToolRouter {
    pub fn new(
        retriever: Arc<Retriever>,
        llm: Arc<dyn LlmGateway>,
        limits: PlanLimits,
        summary_temperature: f32,
        llm_policy: RetryPolicy,
    ) -> Self {
        Self {
            retriever,
            llm,
            limits,
            summary_temperature,
            llm_policy,
        }
    }

    pub fn limits(&self) -> PlanLimits {
        self.limits
    }

    /// Gather tool outputs for `question`, using `history` to resolve
    /// follow-up questions.
    pub async fn route(&self, question: &str, history: &[ConversationTurn]) -> RouteOutcome {
        let query = contextualize(question, history);
        let plan = plan(&query, &self.limits);
        debug!(
            calls = ?plan.calls.iter().map(|c| c.tool.name()).collect::<Vec<_>>(),
            truncated = plan.truncated,
            "tool plan"
        );

        let (retrieval, rest): (Vec<ToolCall>, Vec<ToolCall>) =
            plan.calls.into_iter().partition(|c| c.tool.is_retrieval());

        let mut trace = self.run_retrieval(&retrieval).await;

        if !trace.iter().any(|t| t.success)
            && !retrieval.iter().any(|c| c.tool == Tool::Retriever)
            && trace.len() < self.limits.max_tool_calls
        {
            let filter = retrieval.first().and_then(|c| c.filter.clone());
            let fallback = ToolCall {
                filter,
                ..ToolCall::new(Tool::Retriever, &query, &self.limits, None)
            };
            debug!("no retrieval tool succeeded, falling back to direct retrieval");
            trace.extend(self.run_retrieval(std::slice::from_ref(&fallback)).await);
        }

        for call in rest {
            if trace.len() >= self.limits.max_tool_calls {
                break;
            }
            let inv = self.summarize(&call, &trace).await;
            trace.push(inv);
        }

        let budget_exceeded = plan.truncated.then_some(self.limits.max_tool_calls);
        if let Some(budget) = budget_exceeded {
            warn!(error = %HarnessError::ToolBudgetExceeded { budget }, "plan truncated");
        }

        RouteOutcome {
            context: tool_context(&trace),
            trace,
            budget_exceeded,
        }
    }

    /// Embed the distinct queries once, then query the index for every call
    /// concurrently. Trace order follows `calls`.
    async fn run_retrieval(&self, calls: &[ToolCall]) -> Vec<ToolInvocation> {
        if calls.is_empty() {
            return Vec::new();
        }
        if self.retriever.is_empty().await.unwrap_or(false) {
            return calls
                .iter()
                .map(|c| invocation(c, Ok(c.tool.render(&[]))))
                .collect();
        }

        let mut distinct: Vec<String> = Vec::new();
        for c in calls {
            if !distinct.contains(&c.query) {
                distinct.push(c.query.clone());
            }
        }
        let vectors: HashMap<String, Vec<f32>> = match self.retriever.embed_queries(&distinct).await {
            Ok(v) => distinct.into_iter().zip(v).collect(),
            Err(e) => {
                return calls
                    .iter()
                    .map(|c| invocation(c, Err(e.to_string())))
                    .collect();
            }
        };

        let futures = calls.iter().map(|call| {
            let vectors = &vectors;
            async move {
                let result = match vectors.get(&call.query) {
                    Some(v) => self
                        .retriever
                        .search_vector(v, call.k, call.filter.as_ref())
                        .await
                        .map(|hits| call.tool.render(&hits))
                        .map_err(|e| e.to_string()),
                    None => Err("query was not embedded".to_string()),
                };
                invocation(call, result)
            }
        });
        join_all(futures).await
    }

    async fn summarize(&self, call: &ToolCall, prior: &[ToolInvocation]) -> ToolInvocation {
        let material = tool_context(prior);
        if material.is_empty() {
            return invocation(call, Err("nothing to summarize".to_string()));
        }
        let request = summary_request(&call.query, &material, self.summary_temperature);
        let result = with_backoff(
            &self.llm_policy,
            "summarize",
            HarnessError::LlmUnavailable,
            || self.llm.complete(&request),
        )
        .await
        .map_err(|e| e.to_string());
        invocation(call, result)
    }
}

fn invocation(call: &ToolCall, result: Result<String, String>) -> ToolInvocation {
    match result {
        Ok(output) => {
            debug!(tool = call.tool.name(), chars = output.len(), "tool call");
            ToolInvocation {
                tool: call.tool.name().to_string(),
                input: call.query.clone(),
                output,
                success: true,
            }
        }
        Err(message) => {
            let err = HarnessError::ToolFailed {
                tool: call.tool.name().to_string(),
                message,
            };
            warn!(error = %err, "tool call failed");
            ToolInvocation {
                tool: call.tool.name().to_string(),
                input: call.query.clone(),
                output: err.to_string(),
                success: false,
            }
        }
    }
}

const FOLLOW_UP_WORDS: &[&str] = &[
    "he", "she", "him", "her", "his", "hers", "they", "them", "their", "it", "its", "that",
    "this", "there",
];

/// Prefix a short follow-up question with the previous user question so
/// retrieval has something to anchor pronouns to.
pub fn contextualize(question: &str, history: &[ConversationTurn]) -> String {
    let words: Vec<String> = question
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    let is_follow_up =
        words.len() <= 8 && words.iter().any(|w| FOLLOW_UP_WORDS.contains(&w.as_str()));
    if !is_follow_up {
        return question.to_string();
    }
    match history
        .iter()
        .rev()
        .find(|t| t.role == Role::User && t.is_complete())
    {
        Some(prev) => format!("{} {}", prev.text.trim(), question.trim()),
        None => question.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledEmbedder;
    use crate::llm::ExtractiveLlm;
    use lore_harness_core::chunk::{chunk_document, ChunkerConfig};
    use lore_harness_core::embedding::HashEmbedder;
    use lore_harness_core::models::{Document, IndexEntry};
    use lore_harness_core::store::memory::InMemoryIndex;
    use lore_harness_core::store::VectorIndex;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(0, Duration::from_secs(5))
    }

    async fn router_with(limits: PlanLimits) -> ToolRouter {
        let embedder = Arc::new(HashEmbedder::new(64).unwrap());
        let index = Arc::new(InMemoryIndex::new(64));
        let cfg = ChunkerConfig {
            target_size: 80,
            overlap: 0,
            ..ChunkerConfig::default()
        };
        for (id, text) in [
            ("V1.txt", "Chapter 1\nThe harbor burned at dawn. Mira escaped on a fishing boat."),
            ("V2.txt", "Chapter 1\nMira returned to the harbor as captain of the guard."),
        ] {
            let doc = Document::new(id, text);
            let entries: Vec<IndexEntry> = chunk_document(&doc, &cfg)
                .unwrap()
                .into_iter()
                .map(|c| {
                    let v = embedder.embed_text(&c.text);
                    IndexEntry::new(c, v, doc.volume.clone())
                })
                .collect();
            index.upsert(&entries).await.unwrap();
        }
        let retriever = Arc::new(Retriever::new(embedder, index, policy(), policy()));
        ToolRouter::new(retriever, Arc::new(ExtractiveLlm::new()), limits, 0.3, policy())
    }

    #[tokio::test]
    async fn test_plain_question_single_invocation() {
        let router = router_with(PlanLimits::default()).await;
        let out = router.route("What happened at the harbor?", &[]).await;
        assert_eq!(out.trace.len(), 1);
        assert_eq!(out.trace[0].tool, "search_novels");
        assert!(out.trace[0].success);
        assert!(out.context.contains("harbor"));
        assert!(out.budget_exceeded.is_none());
    }

    #[tokio::test]
    async fn test_multi_tool_plan_with_summary() {
        let router = router_with(PlanLimits::default()).await;
        let out = router
            .route("Who is Mira and which volume does she first appear in? Summarize.", &[])
            .await;
        let tools: Vec<&str> = out.trace.iter().map(|t| t.tool.as_str()).collect();
        assert_eq!(tools, vec!["search_character", "find_volume", "summarize_content"]);
        assert!(out.trace.iter().all(|t| t.success));
        assert!(out.trace[1].output.starts_with("Found in: "));
    }

    #[tokio::test]
    async fn test_budget_truncation_reported() {
        let limits = PlanLimits {
            max_tool_calls: 1,
            ..PlanLimits::default()
        };
        let router = router_with(limits).await;
        let out = router
            .route("Who is Mira and which volume does she first appear in?", &[])
            .await;
        assert_eq!(out.trace.len(), 1);
        assert_eq!(out.budget_exceeded, Some(1));
    }

    #[tokio::test]
    async fn test_failed_embedding_recorded_not_fatal() {
        let index = Arc::new(InMemoryIndex::new(8));
        let embedder = HashEmbedder::new(8).unwrap();
        let doc = Document::new("V1.txt", "Some text about the harbor.");
        let entries: Vec<IndexEntry> = chunk_document(&doc, &ChunkerConfig::default())
            .unwrap()
            .into_iter()
            .map(|c| {
                let v = embedder.embed_text(&c.text);
                IndexEntry::new(c, v, None)
            })
            .collect();
        index.upsert(&entries).await.unwrap();
        let retriever = Arc::new(Retriever::new(
            Arc::new(DisabledEmbedder::new(8)),
            index,
            policy(),
            policy(),
        ));
        let router = ToolRouter::new(
            retriever,
            Arc::new(ExtractiveLlm::new()),
            PlanLimits::default(),
            0.3,
            policy(),
        );

        let out = router.route("Who is Mira?", &[]).await;
        // Character fails, then the direct Retriever fallback fails too.
        assert_eq!(out.trace.len(), 2);
        assert_eq!(out.trace[1].tool, "search_novels");
        assert!(out.trace.iter().all(|t| !t.success));
        assert!(out.context.is_empty());
    }

    #[test]
    fn test_contextualize_follow_up() {
        let history = vec![
            ConversationTurn::user("Who is Mira?"),
            ConversationTurn::assistant("A sailor."),
        ];
        assert_eq!(
            contextualize("Where was she born?", &history),
            "Who is Mira? Where was she born?"
        );
        assert_eq!(
            contextualize("What happened at the harbor?", &history),
            "What happened at the harbor?"
        );
        assert_eq!(contextualize("Where was she born?", &[]), "Where was she born?");
    }
}
