//! `lore ask` and the `lore chat` REPL.
//!
//! Both go through [`Agent`]. Streamed answers print fragments as they
//! arrive; Ctrl-C during an answer cancels that turn only.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use lore_harness_core::models::ToolInvocation;
use lore_harness_core::HarnessError;

use crate::agent::{Agent, Answer, AnswerEvent, AnswerMode};
use crate::app::{ensure_embeddings, Harness};
use crate::config::Config;
use crate::ingest::ingest_and_print;
use crate::status::print_status;

const HELP: &str = "\
Commands:
  /help            show this help
  /status          registry and index overview
  /ingest [path]   ingest the corpus, or one file or directory
  /clear           forget this session's conversation
  /simple          answer with direct retrieval only
  /agent           answer with the tool router (default)
  /quit            leave";

/// Session used by one-shot `ask`; it does not outlive the process.
const ASK_SESSION: &str = "ask";

/// Answer one question and exit.
pub async fn run_ask(config: &Config, question: &str, simple: bool, stream: bool) -> Result<()> {
    ensure_embeddings(config, "ask")?;
    let harness = Harness::open(config).await?;
    let agent = harness.agent();
    let mode = if simple { AnswerMode::Simple } else { AnswerMode::Agent };

    let result = if stream {
        stream_answer(&agent, ASK_SESSION, question, mode).await
    } else {
        agent
            .answer_with(ASK_SESSION, question, mode)
            .await
            .map(|answer| print_answer(&answer))
            .map_err(anyhow::Error::from)
    };
    harness.close().await;
    result
}

/// Interactive session on stdin. Answers are streamed.
pub async fn run_chat(config: &Config, session: &str) -> Result<()> {
    ensure_embeddings(config, "chat")?;
    let harness = Harness::open(config).await?;
    let agent = harness.agent();
    let mut mode = AnswerMode::Agent;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("lore chat (session '{}'). Type /help for commands.", session);
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let (command, arg) = match input.split_once(char::is_whitespace) {
            Some((c, a)) => (c, Some(a.trim()).filter(|a| !a.is_empty())),
            None => (input, None),
        };
        match command {
            "/quit" | "/exit" => break,
            "/help" => println!("{}", HELP),
            "/status" => {
                if let Err(e) = print_status(&harness).await {
                    println!("error: {:#}", e);
                }
            }
            "/ingest" => {
                if let Err(e) = ingest_and_print(&harness, arg.map(Path::new), false).await {
                    println!("error: {:#}", e);
                }
            }
            "/clear" => {
                agent.clear(session).await;
                println!("cleared");
            }
            "/simple" => {
                mode = AnswerMode::Simple;
                println!("mode: simple");
            }
            "/agent" => {
                mode = AnswerMode::Agent;
                println!("mode: agent");
            }
            c if c.starts_with('/') => println!("unknown command {}; try /help", c),
            _ => {
                if let Err(e) = stream_answer(&agent, session, input, mode).await {
                    println!("error: {:#}", e);
                }
            }
        }
    }

    harness.close().await;
    Ok(())
}

async fn stream_answer(
    agent: &Arc<Agent>,
    session: &str,
    question: &str,
    mode: AnswerMode,
) -> Result<()> {
    let mut events = agent.answer_stream(session, question, mode).await;
    let mut stdout = std::io::stdout();
    let mut failure = None;

    loop {
        let event = tokio::select! {
            event = events.next() => event,
            _ = tokio::signal::ctrl_c() => {
                events.cancel();
                continue;
            }
        };
        match event {
            Some(AnswerEvent::Fragment(text)) => {
                write!(stdout, "{}", text)?;
                stdout.flush()?;
            }
            Some(AnswerEvent::Completed {
                trace,
                budget_exceeded,
                degraded,
            }) => {
                println!();
                print_notes(&trace, budget_exceeded, degraded);
            }
            Some(AnswerEvent::Failed(message)) => {
                println!();
                failure = Some(message);
            }
            Some(AnswerEvent::Cancelled) => {
                println!();
                println!("(cancelled)");
            }
            None => break,
        }
    }
    events.finish().await;

    match failure {
        Some(message) => Err(anyhow::anyhow!("answer interrupted: {}", message)),
        None => Ok(()),
    }
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text);
    print_notes(&answer.trace, answer.budget_exceeded, answer.degraded);
}

fn print_notes(trace: &[ToolInvocation], budget_exceeded: Option<usize>, degraded: bool) {
    if !trace.is_empty() {
        let tools: Vec<String> = trace
            .iter()
            .map(|t| {
                if t.success {
                    t.tool.clone()
                } else {
                    format!("{} (failed)", t.tool)
                }
            })
            .collect();
        println!("  tools: {}", tools.join(", "));
    }
    if let Some(budget) = budget_exceeded {
        println!("  note: {}", HarnessError::ToolBudgetExceeded { budget });
    }
    if degraded {
        println!("  note: chat model unavailable, answer quoted from retrieved passages");
    }
}
