use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use futures::StreamExt;
use tempfile::TempDir;

use lore_harness::agent::{AnswerEvent, AnswerMode};
use lore_harness::app::Harness;
use lore_harness::config::{parse_config, Config};
use lore_harness::ingest::IngestOutcome;
use lore_harness::llm::NOT_FOUND_ANSWER;
use lore_harness_core::models::{Document, IngestStatus, TurnStatus};

const V1: &str = "Mira sailed the grey ship into the harbor. \
The harbor burned while the fleet watched silently. \
Captain Oren swore revenge against the northern council.";

const V2: &str = "Years later the council rebuilt every harbor wall. \
Mira returned as an envoy carrying sealed letters. \
Oren refused to meet her at the gate.";

/// Temp workspace with a corpus of two volumes and a config using the
/// offline hash embedder and extractive answerer.
fn setup_test_env(max_turns: usize) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let novels = root.join("novels");
    fs::create_dir_all(&novels).unwrap();
    fs::write(novels.join("V1.txt"), V1).unwrap();
    fs::write(novels.join("V2.txt"), V2).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/lore.sqlite"

[chunking]
target_size = 8
overlap = 0
unit = "token"

[embedding]
provider = "hash"
dims = 128

[llm]
provider = "extractive"

[memory]
max_turns = {max_turns}

[corpus]
root = "{root}/novels"
include_globs = ["**/*.txt"]
"#,
        root = root.display(),
        max_turns = max_turns,
    );

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_path = config_dir.join("lore.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn load(config_path: &Path) -> Config {
    let text = fs::read_to_string(config_path).unwrap();
    parse_config(&text, |_| None).unwrap()
}

async fn open_with_corpus(max_turns: usize) -> (TempDir, Harness) {
    let (tmp, config_path) = setup_test_env(max_turns);
    let harness = Harness::open(&load(&config_path)).await.unwrap();
    let pipeline = harness.pipeline().unwrap();
    pipeline.ingest(&Document::new("V1.txt", V1), false).await.unwrap();
    pipeline.ingest(&Document::new("V2.txt", V2), false).await.unwrap();
    (tmp, harness)
}

// ============ Library ============

#[tokio::test]
async fn test_reingest_is_idempotent_and_replaces_on_change() {
    let (_tmp, config_path) = setup_test_env(20);
    let harness = Harness::open(&load(&config_path)).await.unwrap();
    let pipeline = harness.pipeline().unwrap();
    let registry = harness.registry();
    let index = harness.index();

    let doc = Document::new("V1.txt", V1);
    assert_eq!(
        pipeline.ingest(&doc, false).await.unwrap(),
        IngestOutcome::Embedded { chunks: 3, replaced: 0 }
    );
    let record = registry.get("V1.txt").await.unwrap().unwrap();
    assert_eq!(record.status, IngestStatus::Embedded);
    assert_eq!(record.chunk_count, 3);
    assert_eq!(index.count().await.unwrap(), 3);

    assert_eq!(
        pipeline.ingest(&doc, false).await.unwrap(),
        IngestOutcome::Skipped { chunks: 3 }
    );
    assert_eq!(index.count().await.unwrap(), 3);

    let changed = Document::new("V1.txt", format!("{} The end came quietly.", V1));
    let outcome = pipeline.ingest(&changed, false).await.unwrap();
    assert_eq!(outcome, IngestOutcome::Embedded { chunks: 4, replaced: 3 });
    let record = registry.get("V1.txt").await.unwrap().unwrap();
    assert_eq!(record.fingerprint, changed.fingerprint);
    assert_ne!(record.fingerprint, doc.fingerprint);
    assert_eq!(index.count().await.unwrap(), 4);
    harness.close().await;
}

#[tokio::test]
async fn test_retrieve_spans_volumes_in_score_order() {
    let (_tmp, harness) = open_with_corpus(20).await;
    let retriever = harness.retriever();

    let results = retriever.retrieve_scored("Mira harbor", 2, None).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].score >= results[1].score);

    let again = retriever.retrieve_scored("Mira harbor", 2, None).await.unwrap();
    let ids = |r: &[lore_harness_core::models::ScoredEntry]| {
        r.iter().map(|s| s.entry.chunk.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&results), ids(&again));

    let all = retriever.retrieve("Mira", 10, None).await.unwrap();
    let docs: std::collections::BTreeSet<_> = all.iter().map(|c| c.document_id.as_str()).collect();
    assert!(docs.contains("V1.txt") && docs.contains("V2.txt"));
    harness.close().await;
}

#[tokio::test]
async fn test_empty_index_answers_not_found() {
    let (_tmp, config_path) = setup_test_env(20);
    let harness = Harness::open(&load(&config_path)).await.unwrap();
    assert!(harness.retriever().retrieve("Mira", 5, None).await.unwrap().is_empty());

    let answer = harness.agent().answer("s", "Who is Mira?").await.unwrap();
    assert_eq!(answer, NOT_FOUND_ANSWER);
    harness.close().await;
}

#[tokio::test]
async fn test_simple_question_uses_one_tool() {
    let (_tmp, harness) = open_with_corpus(20).await;
    let agent = harness.agent();

    let answer = agent
        .answer_with("s", "What happened at the harbor?", AnswerMode::Agent)
        .await
        .unwrap();
    assert_eq!(answer.trace.len(), 1);
    assert_eq!(answer.trace[0].tool, "search_novels");
    assert!(answer.trace[0].success);
    assert!(answer.text.contains("harbor"), "{}", answer.text);
    assert!(answer.budget_exceeded.is_none());
    harness.close().await;
}

#[tokio::test]
async fn test_memory_keeps_latest_turns() {
    let (_tmp, harness) = open_with_corpus(4).await;
    let agent = harness.agent();

    for q in ["Who is Mira?", "What burned?", "Who swore revenge?"] {
        agent.answer("reader", q).await.unwrap();
    }
    let history = agent.history("reader").await;
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].text, "What burned?");
    assert_eq!(history[2].text, "Who swore revenge?");
    assert!(agent.history("someone-else").await.is_empty());
    harness.close().await;
}

#[tokio::test]
async fn test_streamed_answer_is_recorded() {
    let (_tmp, harness) = open_with_corpus(20).await;
    let agent = harness.agent();

    let mut stream = agent
        .answer_stream("s", "What happened at the harbor?", AnswerMode::Simple)
        .await;
    let mut text = String::new();
    let mut completed = false;
    while let Some(event) = stream.next().await {
        match event {
            AnswerEvent::Fragment(f) => text.push_str(&f),
            AnswerEvent::Completed { trace, .. } => {
                assert!(trace.is_empty());
                completed = true;
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    stream.finish().await;
    assert!(completed);
    assert!(text.contains("harbor"), "{}", text);

    let history = agent.history("s").await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].text, text);
    assert!(history.iter().all(|t| t.status == TurnStatus::Complete));
    harness.close().await;
}

// ============ CLI ============

fn run_lore(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = env!("CARGO_BIN_EXE_lore");
    let output = Command::new(binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("LORE_LOG")
        .env_remove("RUST_LOG")
        .env_remove("OLLAMA_BASE_URL")
        .env_remove("LLM_MODEL")
        .env_remove("EMBEDDING_MODEL")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run lore binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_cli_init_is_idempotent() {
    let (tmp, config) = setup_test_env(20);
    for _ in 0..2 {
        let (stdout, stderr, ok) = run_lore(&config, &["init"]);
        assert!(ok, "init failed: {}", stderr);
        assert!(stdout.contains("Database initialized successfully."));
    }
    assert!(tmp.path().join("data").join("lore.sqlite").exists());
}

#[test]
fn test_cli_ingest_status_search_ask() {
    let (_tmp, config) = setup_test_env(20);
    run_lore(&config, &["init"]);

    let (stdout, stderr, ok) = run_lore(&config, &["ingest"]);
    assert!(ok, "ingest failed: {}", stderr);
    assert!(stdout.contains("V1.txt: embedded 3 chunk(s)"), "{}", stdout);
    assert!(stdout.contains("V2.txt: embedded"), "{}", stdout);
    assert!(stdout.contains("ok"));

    let (stdout, _, ok) = run_lore(&config, &["ingest"]);
    assert!(ok);
    assert!(stdout.contains("V1.txt: unchanged (3 chunks)"), "{}", stdout);

    let (stdout, stderr, ok) = run_lore(&config, &["status"]);
    assert!(ok, "status failed: {}", stderr);
    assert!(stdout.contains("Embedded:    2"), "{}", stdout);
    assert!(stdout.contains("V1.txt"));

    let (stdout, stderr, ok) = run_lore(&config, &["search", "harbor burned", "--k", "2"]);
    assert!(ok, "search failed: {}", stderr);
    assert!(stdout.contains("1. ["), "{}", stdout);
    assert!(stdout.contains("2. ["), "{}", stdout);
    assert!(!stdout.contains("3. ["), "{}", stdout);

    let (stdout, _, ok) = run_lore(&config, &["search", "harbor", "--volume", "Volume 2"]);
    assert!(ok);
    assert!(stdout.contains("V2.txt"), "{}", stdout);
    assert!(!stdout.contains("V1.txt"), "{}", stdout);

    let (stdout, stderr, ok) = run_lore(&config, &["ask", "What happened at the harbor?"]);
    assert!(ok, "ask failed: {}", stderr);
    assert!(stdout.contains("harbor"), "{}", stdout);
    assert!(stdout.contains("tools: search_novels"), "{}", stdout);

    let (stdout, stderr, ok) = run_lore(&config, &["ask", "What burned?", "--stream", "--simple"]);
    assert!(ok, "streamed ask failed: {}", stderr);
    assert!(stdout.contains("burned"), "{}", stdout);
}

#[test]
fn test_cli_ingest_single_file() {
    let (tmp, config) = setup_test_env(20);
    let file = tmp.path().join("novels").join("V2.txt");
    let (stdout, stderr, ok) = run_lore(&config, &["ingest", file.to_str().unwrap()]);
    assert!(ok, "ingest failed: {}", stderr);
    assert!(stdout.contains("ingest 1 document(s)"), "{}", stdout);
    assert!(stdout.contains("V2.txt: embedded"), "{}", stdout);
}

#[test]
fn test_cli_requires_embeddings() {
    let (_tmp, config) = setup_test_env(20);
    let text = fs::read_to_string(&config)
        .unwrap()
        .replace("provider = \"hash\"\ndims = 128\n", "provider = \"disabled\"\n");
    fs::write(&config, text).unwrap();

    for args in [&["ingest"][..], &["ask", "Who is Mira?"][..]] {
        let (_, stderr, ok) = run_lore(&config, args);
        assert!(!ok);
        assert!(stderr.contains("requires embeddings"), "{}", stderr);
    }
}

#[test]
fn test_cli_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_lore(&tmp.path().join("nope.toml"), &["status"]);
    assert!(!ok);
    assert!(stderr.contains("failed to read config file"), "{}", stderr);
}
