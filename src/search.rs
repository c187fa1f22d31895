//! `lore search`: raw nearest-neighbor lookup without the agent.

use anyhow::Result;

use lore_harness_core::models::{QueryFilter, ScoredEntry};
use lore_harness_core::search::source_label;

use crate::app::{ensure_embeddings, Harness};
use crate::config::Config;

const EXCERPT_CHARS: usize = 240;

/// Run the search command and print ranked passages.
pub async fn run_search(
    config: &Config,
    query: &str,
    k: Option<usize>,
    volume: Option<&str>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    ensure_embeddings(config, "search")?;

    let harness = Harness::open(config).await?;
    let filter = volume.map(QueryFilter::volume);
    let k = k.unwrap_or(config.retrieval.k);
    let results = harness
        .retriever()
        .retrieve_scored(query, k, filter.as_ref())
        .await;
    harness.close().await;
    let results = results?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, result) in results.iter().enumerate() {
        print_result(i + 1, result);
    }
    Ok(())
}

fn print_result(rank: usize, result: &ScoredEntry) {
    let chunk = &result.entry.chunk;
    println!(
        "{}. [{:.2}] {} / {}",
        rank,
        result.score,
        chunk.document_id,
        source_label(&result.entry)
    );
    println!("    chunk: {} ({}..{})", chunk.ordinal, chunk.char_start, chunk.char_end);
    println!("    excerpt: \"{}\"", excerpt(&chunk.text));
    println!("    id: {}", chunk.id);
    println!();
}

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_flattens_and_cuts() {
        assert_eq!(excerpt("a\n\n  b"), "a b");
        let long = "é".repeat(300);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), EXCERPT_CHARS + 3);
    }
}
