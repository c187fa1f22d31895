//! Overlapping sliding-window text chunker.
//!
//! Splits a document's text into [`Chunk`]s of at most `target_size` units,
//! where adjacent chunks share exactly `overlap` units. A unit is either a
//! character or a token (a maximal run of non-whitespace characters).
//!
//! Each chunk receives a deterministic UUIDv5 derived from its document ID
//! and ordinal, a SHA-256 hash of its text, byte and character offsets,
//! the overlap window it shares with its predecessor, and the chapter
//! heading it belongs to.
//!
//! # Algorithm
//!
//! 1. Tokenize the text into unit spans (byte ranges).
//! 2. Emit a window of `target_size` units starting at unit 0.
//! 3. In character mode, pull the window end back to the last whitespace
//!    in the window tail so that words are not cut when avoidable.
//! 4. Start the next window `overlap` units before the previous end.
//! 5. Stop once the window reaches the last unit; the final chunk may be
//!    shorter than `target_size`.
//!
//! # Example
//!
//! ```rust
//! use lore_harness_core::chunk::{chunk_text, ChunkUnit, ChunkerConfig};
//!
//! let cfg = ChunkerConfig { target_size: 4, overlap: 1, unit: ChunkUnit::Token };
//! let chunks = chunk_text("doc-1", "one two three four five six seven", &cfg).unwrap();
//! assert_eq!(chunks[0].text, "one two three four");
//! assert_eq!(chunks[1].text, "four five six seven");
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{HarnessError, Result};
use crate::models::{fingerprint, Chunk, Document};

/// Headings that open a new chapter-like section when found at line start.
const SECTION_HEADINGS: &[&str] = &["chapter", "prologue", "epilogue", "interlude", "afterword"];

/// Longest chapter label kept on a chunk.
const MAX_LABEL_CHARS: usize = 60;

/// What one unit of `target_size` / `overlap` measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    #[default]
    Character,
    Token,
}

/// Chunker configuration; the `[chunking]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub target_size: usize,
    pub overlap: usize,
    pub unit: ChunkUnit,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_size: 1000,
            overlap: 200,
            unit: ChunkUnit::Character,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.target_size == 0 {
            return Err(HarnessError::InvalidConfig(
                "chunking.target_size must be > 0".to_string(),
            ));
        }
        if self.overlap >= self.target_size {
            return Err(HarnessError::InvalidConfig(format!(
                "chunking.overlap ({}) must be smaller than chunking.target_size ({})",
                self.overlap, self.target_size
            )));
        }
        Ok(())
    }
}

/// Chunk a [`Document`].
pub fn chunk_document(doc: &Document, config: &ChunkerConfig) -> Result<Vec<Chunk>> {
    chunk_text(&doc.id, &doc.text, config)
}

/// Split `text` into overlapping chunks.
///
/// Returns chunks with contiguous ordinals starting at 0. Text without any
/// unit (empty or whitespace-only in token mode) yields no chunks.
///
/// # Errors
///
/// [`HarnessError::InvalidConfig`] when `overlap >= target_size` or
/// `target_size == 0`.
pub fn chunk_text(document_id: &str, text: &str, config: &ChunkerConfig) -> Result<Vec<Chunk>> {
    config.validate()?;

    let spans = unit_spans(text, config.unit);
    if spans.is_empty() {
        return Ok(Vec::new());
    }

    let headings = find_headings(text);
    let n = spans.len();
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut start_cursor = CharCursor::default();
    let mut end_cursor = CharCursor::default();
    let mut start = 0usize;

    loop {
        let mut end = (start + config.target_size).min(n);

        if end < n && config.unit == ChunkUnit::Character {
            // Must stay past `start + overlap` so the next window advances.
            let min_end = start + config.overlap + 1;
            if let Some(ws) = (min_end..end)
                .rev()
                .find(|&i| text[spans[i].0..spans[i].1].chars().all(char::is_whitespace))
            {
                end = ws + 1;
            }
        }

        let byte_start = spans[start].0;
        let byte_end = spans[end - 1].1;
        let ordinal = chunks.len();

        let context = chunks
            .last()
            .filter(|prev| prev.byte_end > byte_start)
            .map(|prev| text[byte_start..prev.byte_end].to_string());

        let piece = &text[byte_start..byte_end];
        chunks.push(Chunk {
            id: chunk_id(document_id, ordinal),
            document_id: document_id.to_string(),
            ordinal,
            text: piece.to_string(),
            byte_start,
            byte_end,
            char_start: start_cursor.advance(text, byte_start),
            char_end: end_cursor.advance(text, byte_end),
            context,
            chapter: chapter_for(&headings, byte_start, byte_end),
            hash: fingerprint(piece.as_bytes()),
        });

        if end == n {
            break;
        }
        start = end - config.overlap;
    }

    Ok(chunks)
}

/// Deterministic chunk identity for `(document_id, ordinal)`.
pub fn chunk_id(document_id: &str, ordinal: usize) -> String {
    let name = format!("{}#{}", document_id, ordinal);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

fn unit_spans(text: &str, unit: ChunkUnit) -> Vec<(usize, usize)> {
    match unit {
        ChunkUnit::Character => text
            .char_indices()
            .map(|(i, c)| (i, i + c.len_utf8()))
            .collect(),
        ChunkUnit::Token => {
            let mut spans = Vec::new();
            let mut current: Option<usize> = None;
            for (i, c) in text.char_indices() {
                match (c.is_whitespace(), current) {
                    (true, Some(s)) => {
                        spans.push((s, i));
                        current = None;
                    }
                    (false, None) => current = Some(i),
                    _ => {}
                }
            }
            if let Some(s) = current {
                spans.push((s, text.len()));
            }
            spans
        }
    }
}

/// Monotonic byte → char offset converter.
#[derive(Default)]
struct CharCursor {
    byte: usize,
    chars: usize,
}

impl CharCursor {
    fn advance(&mut self, text: &str, to_byte: usize) -> usize {
        if to_byte > self.byte {
            self.chars += text[self.byte..to_byte].chars().count();
            self.byte = to_byte;
        }
        self.chars
    }
}

/// Byte offsets and labels of chapter-like headings, in text order.
fn find_headings(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        let lower = trimmed.to_lowercase();
        let is_heading = SECTION_HEADINGS.iter().any(|h| {
            lower.starts_with(h)
                && lower[h.len()..]
                    .chars()
                    .next()
                    .map_or(true, |c| !c.is_alphabetic())
        });
        if is_heading {
            let label: String = trimmed.chars().take(MAX_LABEL_CHARS).collect();
            out.push((offset + (line.len() - line.trim_start().len()), label));
        }
        offset += line.len();
    }
    out
}

fn chapter_for(headings: &[(usize, String)], start: usize, end: usize) -> Option<String> {
    headings
        .iter()
        .rev()
        .find(|(pos, _)| *pos <= start)
        .or_else(|| headings.iter().find(|(pos, _)| *pos >= start && *pos < end))
        .map(|(_, label)| label.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(target_size: usize, overlap: usize, unit: ChunkUnit) -> ChunkerConfig {
        ChunkerConfig {
            target_size,
            overlap,
            unit,
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", &ChunkerConfig::default()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert!(chunks[0].context.is_none());
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("doc1", "", &ChunkerConfig::default()).unwrap();
        assert!(chunks.is_empty());
        let chunks = chunk_text("doc1", "   \n ", &cfg(4, 1, ChunkUnit::Token)).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_overlap_must_be_smaller() {
        let err = chunk_text("doc1", "abc", &cfg(10, 10, ChunkUnit::Character)).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidConfig(_)));
        let err = chunk_text("doc1", "abc", &cfg(0, 0, ChunkUnit::Character)).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidConfig(_)));
    }

    #[test]
    fn test_character_windows_overlap_exactly() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = chunk_text("doc1", text, &cfg(10, 3, ChunkUnit::Character)).unwrap();
        assert_eq!(chunks[0].text, "abcdefghij");
        assert_eq!(chunks[1].text, "hijklmnopq");
        assert_eq!(chunks[1].context.as_deref(), Some("hij"));
        let last = chunks.last().unwrap();
        assert!(last.text.ends_with('z'));
        assert!(last.text.chars().count() <= 10);
    }

    #[test]
    fn test_character_mode_prefers_whitespace() {
        let text = "alpha beta gamma delta epsilon";
        let chunks = chunk_text("doc1", text, &cfg(12, 2, ChunkUnit::Character)).unwrap();
        // First window "alpha beta g" is pulled back to the space.
        assert_eq!(chunks[0].text, "alpha beta ");
        for pair in chunks.windows(2) {
            let shared = pair[1].context.as_deref().unwrap();
            assert_eq!(shared.chars().count(), 2);
            assert!(pair[0].text.ends_with(shared));
        }
    }

    #[test]
    fn test_token_mode_never_splits_words() {
        let text = "The quick brown fox jumps over the lazy dog again";
        let chunks = chunk_text("doc1", text, &cfg(4, 2, ChunkUnit::Token)).unwrap();
        let words: Vec<&str> = text.split_whitespace().collect();
        for c in &chunks {
            for w in c.text.split_whitespace() {
                assert!(words.contains(&w), "split word: {}", w);
            }
            assert!(c.text.split_whitespace().count() <= 4);
        }
        assert_eq!(chunks[0].text, "The quick brown fox");
        assert_eq!(chunks[1].text, "brown fox jumps over");
        assert_eq!(chunks[1].context.as_deref(), Some("brown fox"));
        assert!(chunks.last().unwrap().text.ends_with("again"));
    }

    #[test]
    fn test_covers_full_text() {
        let text = "one two three four five six seven eight nine ten eleven";
        let chunks = chunk_text("doc1", text, &cfg(3, 1, ChunkUnit::Token)).unwrap();
        assert_eq!(chunks.first().unwrap().byte_start, 0);
        assert_eq!(chunks.last().unwrap().byte_end, text.len());
        for pair in chunks.windows(2) {
            assert!(pair[1].byte_start < pair[0].byte_end, "gap between chunks");
        }
    }

    #[test]
    fn test_ordinals_contiguous_and_offsets() {
        let text = "héllo wörld ".repeat(40);
        let chunks = chunk_text("doc1", &text, &cfg(25, 5, ChunkUnit::Character)).unwrap();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i);
            assert_eq!(&text[c.byte_start..c.byte_end], c.text);
            assert_eq!(c.char_end - c.char_start, c.text.chars().count());
        }
    }

    #[test]
    fn test_deterministic_ids() {
        let text = "Alpha beta gamma delta epsilon zeta eta theta";
        let c1 = chunk_text("doc1", text, &cfg(3, 1, ChunkUnit::Token)).unwrap();
        let c2 = chunk_text("doc1", text, &cfg(3, 1, ChunkUnit::Token)).unwrap();
        assert_eq!(c1, c2);
        assert_ne!(chunk_id("doc1", 0), chunk_id("doc2", 0));
        assert_ne!(chunk_id("doc1", 0), chunk_id("doc1", 1));
    }

    #[test]
    fn test_chapter_labels() {
        let text = "Prologue\nThe sky was grey.\n\nChapter 1: Departure\nShe left the harbor at dawn.\n\nChapter 2\nThe storm came.";
        let chunks = chunk_text("V1.txt", text, &cfg(6, 1, ChunkUnit::Token)).unwrap();
        assert_eq!(chunks[0].chapter.as_deref(), Some("Prologue"));
        let last = chunks.last().unwrap();
        assert_eq!(last.chapter.as_deref(), Some("Chapter 2"));
        assert!(chunks
            .iter()
            .any(|c| c.chapter.as_deref() == Some("Chapter 1: Departure")));
    }

    #[test]
    fn test_chaptered_word_is_not_heading() {
        let headings = find_headings("Chapters are long.\nchapter 3\n");
        assert_eq!(headings.len(), 1);
        assert_eq!(headings[0].1, "chapter 3");
    }
}
