//! Prompt assembly for answer synthesis and summarization.
//!
//! Prompts are plain chat messages. The final user message always has the
//! same two sections, which the offline extractive model relies on:
//!
//! ```text
//! ## Context
//! [Source 1: Volume 1, Chapter 2]
//! ...
//!
//! ## Question
//! ...
//! ```

use lore_harness_core::llm::{ChatMessage, LlmRequest};
use lore_harness_core::models::{ConversationTurn, Role, ToolInvocation};

pub const CONTEXT_HEADER: &str = "## Context";
pub const QUESTION_HEADER: &str = "## Question";

/// Shown in place of context when nothing was retrieved.
pub const NO_CONTEXT: &str = "No relevant context found.";

pub const SYSTEM_PROMPT: &str = "You are an expert on the novels stored in this library. \
Answer questions about characters, plot, events and themes using the retrieved passages. \
Cite the volume (and chapter when given) for every fact you use. \
Keep events from different volumes apart. \
If the passages do not contain the answer, say that you could not find it in the available volumes \
instead of guessing.";

const SUMMARY_INSTRUCTION: &str = "Summarize the passages below in a few short paragraphs. \
Keep names, volumes and the order of events accurate.";

/// Build the answer request: system prompt, replayed history, then the
/// context and question.
pub fn answer_request(
    history: &[ConversationTurn],
    question: &str,
    context: &str,
    temperature: f32,
) -> LlmRequest {
    let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
    for turn in history.iter().filter(|t| t.is_complete()) {
        messages.push(match turn.role {
            Role::User => ChatMessage::user(turn.text.clone()),
            Role::Assistant => ChatMessage::assistant(turn.text.clone()),
            Role::System => ChatMessage::system(turn.text.clone()),
        });
    }
    messages.push(ChatMessage::user(with_sections(
        context,
        question,
        "Answer using the context above and cite your sources.",
    )));
    LlmRequest::new(messages, temperature)
}

/// Build a summarization request over `material`.
pub fn summary_request(question: &str, material: &str, temperature: f32) -> LlmRequest {
    LlmRequest::new(
        vec![
            ChatMessage::system(SUMMARY_INSTRUCTION),
            ChatMessage::user(with_sections(material, question, "Write the summary.")),
        ],
        temperature,
    )
}

/// Join successful tool outputs into one context block.
pub fn tool_context(trace: &[ToolInvocation]) -> String {
    trace
        .iter()
        .filter(|t| t.success)
        .map(|t| format!("[{}]\n{}", t.tool, t.output))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn with_sections(context: &str, question: &str, instruction: &str) -> String {
    let context = if context.trim().is_empty() {
        NO_CONTEXT
    } else {
        context
    };
    format!(
        "{}\n{}\n\n{}\n{}\n\n{}",
        CONTEXT_HEADER, context, QUESTION_HEADER, question, instruction
    )
}

/// Split a prompt built by this module back into `(context, question)`.
pub fn split_sections(prompt: &str) -> Option<(&str, &str)> {
    let ctx_start = prompt.find(CONTEXT_HEADER)? + CONTEXT_HEADER.len();
    let q_pos = prompt.rfind(QUESTION_HEADER)?;
    if q_pos < ctx_start {
        return None;
    }
    let context = prompt[ctx_start..q_pos].trim();
    let rest = &prompt[q_pos + QUESTION_HEADER.len()..];
    let question = rest.trim_start().split("\n\n").next().unwrap_or("").trim();
    Some((context, question))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_request_layout() {
        let history = vec![
            ConversationTurn::user("Who is Mira?"),
            ConversationTurn::assistant("A sailor.").incomplete(),
        ];
        let req = answer_request(&history, "Where was she born?", "[Source 1: Volume 1]\nMira was born in Tal.", 0.7);
        assert_eq!(req.messages[0].role, Role::System);
        // Incomplete turns are not replayed.
        assert_eq!(req.messages.len(), 3);
        let last = &req.messages[2].content;
        let (ctx, q) = split_sections(last).unwrap();
        assert_eq!(ctx, "[Source 1: Volume 1]\nMira was born in Tal.");
        assert_eq!(q, "Where was she born?");
    }

    #[test]
    fn test_empty_context_placeholder() {
        let req = summary_request("recap", "  ", 0.3);
        let (ctx, _) = split_sections(&req.messages[1].content).unwrap();
        assert_eq!(ctx, NO_CONTEXT);
        assert!((req.temperature - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_tool_context_skips_failures() {
        let trace = vec![
            ToolInvocation {
                tool: "search_novels".into(),
                input: "q".into(),
                output: "passage".into(),
                success: true,
            },
            ToolInvocation {
                tool: "find_volume".into(),
                input: "q".into(),
                output: "boom".into(),
                success: false,
            },
        ];
        assert_eq!(tool_context(&trace), "[search_novels]\npassage");
    }
}
