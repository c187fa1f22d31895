//! Agent loop: one user turn from question to answer.
//!
//! ```text
//! question ─▶ session lock ─▶ memory window ─▶ router (or direct retrieval)
//!          ─▶ answer prompt ─▶ LLM ─▶ append user + assistant turns
//! ```
//!
//! Sessions are keyed by explicit IDs, created on first use and purged once
//! idle longer than the configured TTL. Each session has an async lock held
//! for the whole turn, so turns in one session never interleave.
//!
//! When the chat model fails after retries, the answer is built offline
//! from the retrieved passages instead of surfacing the error.
//!
//! [`Agent::answer_stream`] runs the turn on a background task and returns
//! an [`AnswerStream`] of [`AnswerEvent`]s. Cancelling it (or dropping it)
//! stops fragment delivery; the turn is then recorded as incomplete or
//! discarded, per `agent.record_incomplete`. Each fragment must arrive
//! within the LLM timeout; a stalled stream ends like a broken one.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lore_harness_core::llm::{fragments, LlmGateway, LlmRequest};
use lore_harness_core::memory::{MemoryBudget, Session};
use lore_harness_core::models::{ConversationTurn, QueryFilter, ToolInvocation};
use lore_harness_core::search::format_context;
use lore_harness_core::tools::{volume_hint, PlanLimits};
use lore_harness_core::{HarnessError, Result};

use crate::config::Config;
use crate::llm::ExtractiveLlm;
use crate::prompt::answer_request;
use crate::retrieve::Retriever;
use crate::retry::{with_backoff, RetryPolicy};
use crate::router::{RouteOutcome, ToolRouter};

/// How context is gathered for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnswerMode {
    /// Plan and run tools through the router.
    #[default]
    Agent,
    /// One direct retrieval call, no tools.
    Simple,
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub limits: PlanLimits,
    pub temperature: f32,
    pub summary_temperature: f32,
    pub memory: MemoryBudget,
    pub session_ttl: chrono::Duration,
    pub record_incomplete: bool,
    pub llm_policy: RetryPolicy,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            limits: config.plan_limits(),
            temperature: config.llm.temperature,
            summary_temperature: config.llm.summary_temperature,
            memory: config.memory.budget(),
            session_ttl: chrono::Duration::seconds(config.memory.session_ttl_secs as i64),
            record_incomplete: config.agent.record_incomplete,
            llm_policy: config.llm.retry_policy(),
        }
    }
}

/// A finished, non-streamed answer.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub trace: Vec<ToolInvocation>,
    /// Call budget, when the tool plan was cut to fit it.
    pub budget_exceeded: Option<usize>,
    /// The chat model was unavailable and the answer was built offline.
    pub degraded: bool,
}

/// Items of an [`AnswerStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerEvent {
    Fragment(String),
    /// The answer is complete and recorded in memory.
    Completed {
        trace: Vec<ToolInvocation>,
        budget_exceeded: Option<usize>,
        degraded: bool,
    },
    /// The model stream broke after some fragments were delivered.
    Failed(String),
    /// The consumer cancelled; no further fragments follow.
    Cancelled,
}

type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

pub struct Agent {
    router: ToolRouter,
    retriever: Arc<Retriever>,
    llm: Arc<dyn LlmGateway>,
    fallback: ExtractiveLlm,
    settings: AgentSettings,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl Agent {
    pub fn new(retriever: Arc<Retriever>, llm: Arc<dyn LlmGateway>, settings: AgentSettings) -> Self {
        let router = ToolRouter::new(
            retriever.clone(),
            llm.clone(),
            settings.limits,
            settings.summary_temperature,
            settings.llm_policy,
        );
        Self {
            router,
            retriever,
            llm,
            fallback: ExtractiveLlm::new(),
            settings,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Answer `query` in `session_id` using the tool router.
    pub async fn answer(&self, session_id: &str, query: &str) -> Result<String> {
        Ok(self.answer_with(session_id, query, AnswerMode::Agent).await?.text)
    }

    pub async fn answer_with(&self, session_id: &str, query: &str, mode: AnswerMode) -> Result<Answer> {
        let handle = self.session(session_id);
        let mut session = handle.lock().await;
        let history = session.memory.window();

        let route = self.gather(query, &history, mode).await;
        let request = answer_request(&history, query, &route.context, self.settings.temperature);
        let (text, degraded) = self.synthesize(&request).await;

        session.memory.append(ConversationTurn::user(query));
        session
            .memory
            .append(ConversationTurn::assistant(text.clone()).with_trace(route.trace.clone()));
        session.touch();
        info!(
            session = session_id,
            ?mode,
            tools = route.trace.len(),
            degraded,
            "answered"
        );

        Ok(Answer {
            text,
            trace: route.trace,
            budget_exceeded: route.budget_exceeded,
            degraded,
        })
    }

    /// Stream the answer to `query`. The session lock is taken before this
    /// returns and held by the background task until the turn is recorded.
    pub async fn answer_stream(
        self: &Arc<Self>,
        session_id: &str,
        query: &str,
        mode: AnswerMode,
    ) -> AnswerStream {
        let guard = self.session(session_id).lock_owned().await;
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(32);

        let task = tokio::spawn(Arc::clone(self).stream_turn(
            guard,
            query.to_string(),
            mode,
            tx,
            cancel.clone(),
        ));

        AnswerStream {
            rx,
            cancel,
            cancel_reported: false,
            task: Some(task),
        }
    }

    /// Turns retained for `session_id`, oldest first. Waits for an
    /// in-flight turn in that session to finish.
    pub async fn history(&self, session_id: &str) -> Vec<ConversationTurn> {
        match self.existing(session_id) {
            Some(handle) => handle.lock().await.memory.window(),
            None => Vec::new(),
        }
    }

    /// Empty one session's memory. Returns false if the session is unknown.
    pub async fn clear(&self, session_id: &str) -> bool {
        match self.existing(session_id) {
            Some(handle) => {
                let mut session = handle.lock().await;
                session.memory.clear();
                session.touch();
                debug!(session = session_id, "cleared");
                true
            }
            None => false,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    fn existing(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(session_id)
            .cloned()
    }

    /// Get or create a session, purging idle ones first. Sessions locked
    /// by a running turn are never purged.
    fn session(&self, session_id: &str) -> SessionHandle {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        let now = Utc::now();
        let ttl = self.settings.session_ttl;
        sessions.retain(|id, handle| match handle.try_lock() {
            Ok(s) if s.is_expired(now, ttl) => {
                debug!(session = %id, "session expired");
                false
            }
            _ => true,
        });
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(Session::new(
                    session_id,
                    self.settings.memory,
                )))
            })
            .clone()
    }

    async fn gather(&self, query: &str, history: &[ConversationTurn], mode: AnswerMode) -> RouteOutcome {
        match mode {
            AnswerMode::Agent => self.router.route(query, history).await,
            AnswerMode::Simple => {
                let filter = volume_hint(query).map(QueryFilter::volume);
                match self
                    .retriever
                    .retrieve_scored(query, self.settings.limits.k, filter.as_ref())
                    .await
                {
                    Ok(hits) => RouteOutcome {
                        context: format_context(&hits),
                        ..RouteOutcome::default()
                    },
                    Err(e) => {
                        warn!(error = %e, "retrieval failed, answering without context");
                        RouteOutcome::default()
                    }
                }
            }
        }
    }

    async fn synthesize(&self, request: &LlmRequest) -> (String, bool) {
        let result = with_backoff(
            &self.settings.llm_policy,
            "answer",
            HarnessError::LlmUnavailable,
            || self.llm.complete(request),
        )
        .await;
        match result {
            Ok(text) => (text, false),
            Err(e) => {
                warn!(error = %e, "chat model unavailable, answering from retrieved passages");
                (self.offline_answer(request), true)
            }
        }
    }

    fn offline_answer(&self, request: &LlmRequest) -> String {
        self.fallback.answer(request.last_user().unwrap_or_default())
    }

    async fn stream_turn(
        self: Arc<Self>,
        mut session: OwnedMutexGuard<Session>,
        query: String,
        mode: AnswerMode,
        tx: mpsc::Sender<AnswerEvent>,
        cancel: CancellationToken,
    ) {
        let history = session.memory.window();

        let route = tokio::select! {
            _ = cancel.cancelled() => {
                self.record_interrupted(&mut session, &query, "", Vec::new());
                return;
            }
            route = self.gather(&query, &history, mode) => route,
        };
        let request = answer_request(&history, &query, &route.context, self.settings.temperature);

        let opened = tokio::select! {
            _ = cancel.cancelled() => {
                self.record_interrupted(&mut session, &query, "", route.trace);
                return;
            }
            opened = with_backoff(
                &self.settings.llm_policy,
                "answer stream",
                HarnessError::LlmUnavailable,
                || self.llm.stream(&request),
            ) => opened,
        };
        let mut degraded = false;
        let mut pieces = match opened {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "chat model unavailable, answering from retrieved passages");
                degraded = true;
                fragments(&self.offline_answer(&request))
            }
        };

        let mut text = String::new();
        let deadline = self.settings.llm_policy.timeout;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.record_interrupted(&mut session, &query, &text, route.trace);
                    return;
                }
                next = tokio::time::timeout(deadline, pieces.next()) => match next.unwrap_or_else(|_| {
                    Some(Err(HarnessError::LlmUnavailable(format!(
                        "no answer fragment within {:?}",
                        deadline
                    ))))
                }) {
                    Some(Ok(piece)) => {
                        text.push_str(&piece);
                        if tx.send(AnswerEvent::Fragment(piece)).await.is_err() {
                            // Consumer went away without cancelling.
                            self.record_interrupted(&mut session, &query, &text, route.trace);
                            return;
                        }
                    }
                    Some(Err(e)) if text.is_empty() => {
                        warn!(error = %e, "answer stream failed, answering from retrieved passages");
                        degraded = true;
                        pieces = fragments(&self.offline_answer(&request));
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, chars = text.len(), "answer stream broke off");
                        self.record_interrupted(&mut session, &query, &text, route.trace);
                        let _ = tx.send(AnswerEvent::Failed(e.to_string())).await;
                        return;
                    }
                    None => break,
                },
            }
        }

        session.memory.append(ConversationTurn::user(query.as_str()));
        session
            .memory
            .append(ConversationTurn::assistant(text.as_str()).with_trace(route.trace.clone()));
        session.touch();
        info!(
            session = %session.id,
            ?mode,
            tools = route.trace.len(),
            degraded,
            streamed = true,
            "answered"
        );
        let _ = tx
            .send(AnswerEvent::Completed {
                trace: route.trace,
                budget_exceeded: route.budget_exceeded,
                degraded,
            })
            .await;
    }

    fn record_interrupted(
        &self,
        session: &mut Session,
        query: &str,
        partial: &str,
        trace: Vec<ToolInvocation>,
    ) {
        warn!(
            error = %HarnessError::Cancelled,
            session = %session.id,
            recorded = self.settings.record_incomplete,
            chars = partial.len(),
            "turn interrupted"
        );
        if self.settings.record_incomplete {
            session.memory.append(ConversationTurn::user(query).incomplete());
            session.memory.append(
                ConversationTurn::assistant(partial)
                    .with_trace(trace)
                    .incomplete(),
            );
        }
        session.touch();
    }
}

/// Cancellable stream of answer events for one turn.
///
/// Ends after [`AnswerEvent::Completed`], [`AnswerEvent::Failed`] or
/// [`AnswerEvent::Cancelled`]. Dropping the stream cancels the turn.
pub struct AnswerStream {
    rx: mpsc::Receiver<AnswerEvent>,
    cancel: CancellationToken,
    cancel_reported: bool,
    task: Option<JoinHandle<()>>,
}

impl AnswerStream {
    /// Stop the turn. The next item is [`AnswerEvent::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Discard any remaining events and wait until the turn is recorded.
    pub async fn finish(mut self) {
        while self.rx.recv().await.is_some() {}
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "answer task failed");
            }
        }
    }
}

impl Stream for AnswerStream {
    type Item = AnswerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<AnswerEvent>> {
        if self.cancel.is_cancelled() {
            if self.cancel_reported {
                return Poll::Ready(None);
            }
            self.cancel_reported = true;
            return Poll::Ready(Some(AnswerEvent::Cancelled));
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for AnswerStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
