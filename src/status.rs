//! Registry and index overview for `lore status`.
//!
//! Shows where each document stands (`pending`, `embedded`, `failed`) and
//! how many entries the vector index holds, so an interrupted or failed
//! ingest is visible before it is retried.

use anyhow::Result;

use lore_harness_core::models::{IngestStatus, RegistryRecord};

use crate::app::Harness;
use crate::config::Config;

/// Run the status command.
pub async fn run_status(config: &Config) -> Result<()> {
    let harness = Harness::open(config).await?;
    let result = print_status(&harness).await;
    harness.close().await;
    result
}

pub async fn print_status(harness: &Harness) -> Result<()> {
    let records = harness.registry().list().await?;
    let entries = harness.index().count().await?;
    let config = &harness.config;

    let count = |status: IngestStatus| records.iter().filter(|r| r.status == status).count();

    println!("Lore Harness Status");
    println!("===================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Corpus:      {}", config.corpus.root.display());
    println!(
        "  Embedding:   {:?} ({} dims)",
        config.embedding.provider,
        config.embedding.dims.unwrap_or(0)
    );
    println!("  LLM:         {:?}", config.llm.provider);
    println!();
    println!("  Documents:   {}", records.len());
    println!("  Embedded:    {}", count(IngestStatus::Embedded));
    println!("  Pending:     {}", count(IngestStatus::Pending));
    println!("  Failed:      {}", count(IngestStatus::Failed));
    println!("  Entries:     {}", entries);

    if !records.is_empty() {
        println!();
        println!(
            "  {:<32} {:>9} {:>7} {:>8}   {}",
            "DOCUMENT", "STATUS", "CHUNKS", "ATTEMPTS", "UPDATED"
        );
        println!("  {}", "-".repeat(80));
        for r in &records {
            print_record(r);
        }
    }
    println!();
    Ok(())
}

fn print_record(r: &RegistryRecord) {
    println!(
        "  {:<32} {:>9} {:>7} {:>8}   {}",
        r.document_id,
        r.status.as_str(),
        r.chunk_count,
        r.attempts,
        r.updated_at.format("%Y-%m-%d %H:%M")
    );
    if let Some(err) = &r.last_error {
        println!("      last error: {}", err);
    }
}
