//! Nearest-neighbor ranking and context formatting.
//!
//! Every [`VectorIndex`](crate::store::VectorIndex) backend delegates to
//! [`nearest`] so that in-memory and persistent indexes produce the same
//! order for the same contents.
//!
//! # Ranking
//!
//! 1. Drop entries rejected by the [`QueryFilter`].
//! 2. Score the rest by cosine similarity to the query vector.
//! 3. Sort by score (desc), chunk ordinal (asc), document ID (asc), chunk ID (asc).
//! 4. Truncate to `k`.

use std::cmp::Ordering;

use crate::embedding::cosine_similarity;
use crate::models::{IndexEntry, QueryFilter, ScoredEntry};

/// Separator placed between sources in a formatted context block.
pub const SOURCE_SEPARATOR: &str = "\n\n---\n\n";

/// Score and rank `entries` against `query`, keeping at most `k`.
pub fn nearest<'a, I>(entries: I, query: &[f32], k: usize, filter: Option<&QueryFilter>) -> Vec<ScoredEntry>
where
    I: IntoIterator<Item = &'a IndexEntry>,
{
    if k == 0 {
        return Vec::new();
    }
    let scored = entries
        .into_iter()
        .filter(|e| filter.map_or(true, |f| f.matches(&e.metadata)))
        .map(|e| ScoredEntry {
            score: cosine_similarity(query, e.vector()),
            entry: e.clone(),
        })
        .collect();
    rank(scored, k)
}

/// Sort scored entries into the canonical order and truncate to `k`.
pub fn rank(mut scored: Vec<ScoredEntry>, k: usize) -> Vec<ScoredEntry> {
    scored.sort_by(compare_scored);
    scored.truncate(k);
    scored
}

/// Canonical result order: score desc, then ordinal, document ID and chunk ID asc.
pub fn compare_scored(a: &ScoredEntry, b: &ScoredEntry) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.entry.chunk.ordinal.cmp(&b.entry.chunk.ordinal))
        .then(a.entry.chunk.document_id.cmp(&b.entry.chunk.document_id))
        .then(a.entry.chunk.id.cmp(&b.entry.chunk.id))
}

/// Human-readable source label: `"Volume 2, Chapter 5"` or the document ID.
pub fn source_label(entry: &IndexEntry) -> String {
    let base = entry
        .metadata
        .volume
        .clone()
        .unwrap_or_else(|| entry.metadata.document_id.clone());
    match &entry.metadata.chapter {
        Some(ch) => format!("{}, {}", base, ch),
        None => base,
    }
}

/// Format retrieved passages as numbered source blocks for a prompt.
///
/// ```rust
/// use lore_harness_core::search::format_context;
///
/// assert_eq!(format_context(&[]), "");
/// ```
pub fn format_context(results: &[ScoredEntry]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "[Source {}: {}]\n{}",
                i + 1,
                source_label(&r.entry),
                r.entry.chunk.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join(SOURCE_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_id;
    use crate::models::Chunk;

    fn entry(doc: &str, ordinal: usize, vector: Vec<f32>, volume: Option<&str>) -> IndexEntry {
        let chunk = Chunk {
            id: chunk_id(doc, ordinal),
            document_id: doc.to_string(),
            ordinal,
            text: format!("{} chunk {}", doc, ordinal),
            byte_start: 0,
            byte_end: 0,
            char_start: 0,
            char_end: 0,
            context: None,
            chapter: None,
            hash: String::new(),
        };
        IndexEntry::new(chunk, vector, volume.map(str::to_string))
    }

    #[test]
    fn test_score_descending() {
        let entries = vec![
            entry("a", 0, vec![0.0, 1.0], None),
            entry("b", 0, vec![1.0, 0.0], None),
            entry("c", 0, vec![1.0, 1.0], None),
        ];
        let out = nearest(&entries, &[1.0, 0.0], 3, None);
        let docs: Vec<&str> = out.iter().map(|s| s.entry.chunk.document_id.as_str()).collect();
        assert_eq!(docs, vec!["b", "c", "a"]);
        assert!(out[0].score >= out[1].score && out[1].score >= out[2].score);
    }

    #[test]
    fn test_ties_break_by_ordinal_then_document() {
        let v = vec![1.0, 0.0];
        let entries = vec![
            entry("b", 1, v.clone(), None),
            entry("b", 0, v.clone(), None),
            entry("a", 1, v.clone(), None),
            entry("a", 0, v.clone(), None),
        ];
        let out = nearest(&entries, &v, 4, None);
        let keys: Vec<(usize, &str)> = out
            .iter()
            .map(|s| (s.entry.chunk.ordinal, s.entry.chunk.document_id.as_str()))
            .collect();
        assert_eq!(keys, vec![(0, "a"), (0, "b"), (1, "a"), (1, "b")]);
    }

    #[test]
    fn test_filter_and_truncate() {
        let entries = vec![
            entry("V1.txt", 0, vec![1.0, 0.0], Some("Volume 1")),
            entry("V2.txt", 0, vec![1.0, 0.0], Some("Volume 2")),
            entry("V2.txt", 1, vec![0.5, 0.5], Some("Volume 2")),
        ];
        let filter = QueryFilter::volume("v2");
        let out = nearest(&entries, &[1.0, 0.0], 1, Some(&filter));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].entry.chunk.document_id, "V2.txt");
        assert_eq!(out[0].entry.chunk.ordinal, 0);
        assert!(nearest(&entries, &[1.0, 0.0], 0, None).is_empty());
    }

    #[test]
    fn test_format_context() {
        let entries = vec![
            entry("V1.txt", 0, vec![1.0], Some("Volume 1")),
            entry("notes.md", 2, vec![1.0], None),
        ];
        let scored = nearest(&entries, &[1.0], 2, None);
        let ctx = format_context(&scored);
        assert!(ctx.starts_with("[Source 1: Volume 1]\nV1.txt chunk 0"));
        assert!(ctx.contains("---\n\n[Source 2: notes.md]\nnotes.md chunk 2"));
    }
}
