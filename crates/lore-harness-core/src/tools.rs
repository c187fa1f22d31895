//! Tool catalogue and deterministic planner.
//!
//! The tool set is closed, so tools are the variants of [`Tool`] rather than
//! trait objects. Each variant carries a name, a description, and the trigger
//! phrases that make it applicable to a question. [`plan`] turns a question
//! into an ordered, budget-bounded list of [`ToolCall`]s; executing them is
//! the router's job in the app crate.
//!
//! # Planning
//!
//! 1. Every applicable retrieval tool, in the order Character, VolumeFinder,
//!    Timeline.
//! 2. None applicable → the plain Retriever.
//! 3. Summarizer appended last when the question asks for a summary.
//! 4. A volume mentioned in the question (`volume 3`, `vol. 3`, `V3`) becomes
//!    a filter on every retrieval call.
//! 5. Calls beyond the budget are dropped and the plan is marked truncated.

use serde::{Deserialize, Serialize};

use crate::models::{volume_number, QueryFilter, ScoredEntry};
use crate::search::format_context;

/// Output of a retrieval tool that found nothing.
pub const NO_RESULTS: &str = "No relevant passages found.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Retriever,
    Character,
    VolumeFinder,
    Timeline,
    Summarizer,
}

impl Tool {
    pub const ALL: [Tool; 5] = [
        Tool::Retriever,
        Tool::Character,
        Tool::VolumeFinder,
        Tool::Timeline,
        Tool::Summarizer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Tool::Retriever => "search_novels",
            Tool::Character => "search_character",
            Tool::VolumeFinder => "find_volume",
            Tool::Timeline => "analyze_timeline",
            Tool::Summarizer => "summarize_content",
        }
    }

    pub fn from_name(name: &str) -> Option<Tool> {
        Tool::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Tool::Retriever => "Search the corpus for passages relevant to the question.",
            Tool::Character => {
                "Look up a character's description, appearance, personality and relationships."
            }
            Tool::VolumeFinder => "Find which volumes discuss a topic, event or character.",
            Tool::Timeline => "Collect passages about events and order them as the story tells them.",
            Tool::Summarizer => "Summarize the passages gathered by the other tools.",
        }
    }

    /// Phrases that make this tool applicable. Empty for the fallback Retriever.
    pub fn triggers(&self) -> &'static [&'static str] {
        match self {
            Tool::Retriever => &[],
            Tool::Character => &[
                "who is",
                "who was",
                "who are",
                "who were",
                "character",
                "characters",
                "personality",
                "appearance",
                "relationship",
                "relationships",
                "backstory",
            ],
            Tool::VolumeFinder => &[
                "which volume",
                "what volume",
                "which book",
                "which volumes",
                "where does",
                "first appear",
                "first appears",
                "first appeared",
            ],
            Tool::Timeline => &[
                "when",
                "timeline",
                "order",
                "before",
                "after",
                "sequence",
                "arc",
                "chronology",
                "chronological",
            ],
            Tool::Summarizer => &[
                "summarize",
                "summarise",
                "summary",
                "overview",
                "recap",
                "tl dr",
            ],
        }
    }

    /// Whether any trigger phrase occurs in `question` as whole words.
    pub fn applies(&self, question: &str) -> bool {
        let words = words(question);
        self.triggers()
            .iter()
            .any(|phrase| contains_phrase(&words, &self::words(phrase)))
    }

    /// Summarizer consumes other tools' output; every other tool retrieves.
    pub fn is_retrieval(&self) -> bool {
        !matches!(self, Tool::Summarizer)
    }

    /// Query text this tool sends to the retriever.
    pub fn query_for(&self, question: &str) -> String {
        match self {
            Tool::Character => format!("character {} description appearance personality", question),
            _ => question.to_string(),
        }
    }

    /// Render retrieved passages as this tool's output payload.
    pub fn render(&self, results: &[ScoredEntry]) -> String {
        if results.is_empty() {
            return NO_RESULTS.to_string();
        }
        match self {
            Tool::VolumeFinder => format!(
                "Found in: {}\n\n{}",
                distinct_volumes(results).join(", "),
                format_context(results)
            ),
            Tool::Timeline => {
                let mut ordered = results.to_vec();
                story_order(&mut ordered);
                format!("Passages in story order:\n\n{}", format_context(&ordered))
            }
            _ => format_context(results),
        }
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Retrieval depth and call budget used by [`plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub k: usize,
    pub volume_finder_k: usize,
    pub max_tool_calls: usize,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            k: 5,
            volume_finder_k: 3,
            max_tool_calls: 4,
        }
    }
}

/// One planned tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub tool: Tool,
    /// Retriever query for retrieval tools; the user question for the Summarizer.
    pub query: String,
    pub k: usize,
    pub filter: Option<QueryFilter>,
}

impl ToolCall {
    pub fn new(tool: Tool, question: &str, limits: &PlanLimits, filter: Option<QueryFilter>) -> Self {
        let k = match tool {
            Tool::VolumeFinder => limits.volume_finder_k,
            _ => limits.k,
        };
        Self {
            tool,
            query: tool.query_for(question),
            k,
            filter,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub calls: Vec<ToolCall>,
    /// Calls that did not fit the budget were dropped.
    pub truncated: bool,
}

/// Build the tool plan for `question`.
pub fn plan(question: &str, limits: &PlanLimits) -> Plan {
    let filter = volume_hint(question).map(QueryFilter::volume);

    let mut calls: Vec<ToolCall> = [Tool::Character, Tool::VolumeFinder, Tool::Timeline]
        .into_iter()
        .filter(|t| t.applies(question))
        .map(|t| ToolCall::new(t, question, limits, filter.clone()))
        .collect();
    if calls.is_empty() {
        calls.push(ToolCall::new(Tool::Retriever, question, limits, filter.clone()));
    }
    if Tool::Summarizer.applies(question) {
        calls.push(ToolCall::new(Tool::Summarizer, question, limits, None));
    }

    let truncated = calls.len() > limits.max_tool_calls;
    calls.truncate(limits.max_tool_calls);
    Plan { calls, truncated }
}

/// Volume named in the question, as a `"Volume N"` label.
///
/// ```rust
/// use lore_harness_core::tools::volume_hint;
///
/// assert_eq!(volume_hint("What happens in vol. 3?").as_deref(), Some("Volume 3"));
/// assert_eq!(volume_hint("Summarize V2").as_deref(), Some("Volume 2"));
/// assert_eq!(volume_hint("Which volume has the duel?"), None);
/// ```
pub fn volume_hint(question: &str) -> Option<String> {
    let words = words(question);
    for (i, w) in words.iter().enumerate() {
        let n = match w.as_str() {
            "volume" | "vol" | "book" => words.get(i + 1).and_then(|next| next.parse::<u32>().ok()),
            _ if w.len() > 1 && w.starts_with('v') && w[1..].chars().all(|c| c.is_ascii_digit()) => {
                w[1..].parse::<u32>().ok()
            }
            _ => None,
        };
        if let Some(n) = n {
            return Some(format!("Volume {}", n));
        }
    }
    None
}

/// Volume labels of `results` in first-seen (rank) order.
pub fn distinct_volumes(results: &[ScoredEntry]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for r in results {
        let label = r
            .entry
            .metadata
            .volume
            .clone()
            .unwrap_or_else(|| r.entry.metadata.document_id.clone());
        if !out.contains(&label) {
            out.push(label);
        }
    }
    out
}

/// Sort passages by (volume number, document ID, ordinal).
pub fn story_order(results: &mut [ScoredEntry]) {
    results.sort_by(|a, b| {
        let va = a.entry.metadata.volume.as_deref().and_then(volume_number);
        let vb = b.entry.metadata.volume.as_deref().and_then(volume_number);
        va.unwrap_or(u32::MAX)
            .cmp(&vb.unwrap_or(u32::MAX))
            .then(a.entry.chunk.document_id.cmp(&b.entry.chunk.document_id))
            .then(a.entry.chunk.ordinal.cmp(&b.entry.chunk.ordinal))
    });
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn contains_phrase(words: &[String], phrase: &[String]) -> bool {
    !phrase.is_empty() && words.windows(phrase.len()).any(|w| w == phrase)
}
