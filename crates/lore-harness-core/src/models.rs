//! Core data models used throughout Lore Harness.
//!
//! These types represent the documents, chunks, index entries, registry
//! records, and conversation turns that flow through ingestion and the
//! agent loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{HarnessError, Result};

/// A source document (one volume of the corpus, usually one file).
///
/// Immutable once constructed: the fingerprint is computed from the text
/// and identifies the stored version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable identity, e.g. the path relative to the corpus root.
    pub id: String,
    pub text: String,
    /// SHA-256 hex of the text bytes.
    pub fingerprint: String,
    /// Volume label, if one could be inferred from the identity.
    pub volume: Option<String>,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let id = id.into();
        let text = text.into();
        Self {
            fingerprint: fingerprint(text.as_bytes()),
            volume: infer_volume_label(&id),
            id,
            text,
        }
    }

    /// Override the inferred volume label.
    pub fn with_volume(mut self, volume: impl Into<String>) -> Self {
        self.volume = Some(volume.into());
        self
    }
}

/// Content hash used for staleness detection.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Infer a volume label from a document identity.
///
/// `V1.txt`, `vol_2.pdf`, `Volume 03.md` and `novel-vol3.txt` all map to
/// `"Volume N"`. Anything else falls back to the file stem.
pub fn infer_volume_label(id: &str) -> Option<String> {
    let file = id.rsplit(['/', '\\']).next().unwrap_or(id);
    let stem = match file.rfind('.') {
        Some(pos) if pos > 0 => &file[..pos],
        _ => file,
    };
    if stem.trim().is_empty() {
        return None;
    }
    match volume_number(stem) {
        Some(n) => Some(format!("Volume {}", n)),
        None => Some(stem.to_string()),
    }
}

/// Extract the volume number from a label such as `"V3"`, `"vol. 3"` or
/// `"Volume 3"`.
pub fn volume_number(label: &str) -> Option<u32> {
    let lower = label.to_lowercase();
    let bytes = lower.as_bytes();
    for marker in ["volume", "vol", "v"] {
        let mut search_from = 0;
        while let Some(rel) = lower[search_from..].find(marker) {
            let start = search_from + rel;
            let before_ok = start == 0 || !bytes[start - 1].is_ascii_alphabetic();
            let rest = lower[start + marker.len()..]
                .trim_start_matches(['.', ' ', '_', '-', '#']);
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if before_ok && !digits.is_empty() {
                return digits.parse().ok();
            }
            search_from = start + marker.len();
        }
    }
    None
}

/// A contiguous segment of a [`Document`], the unit of embedding and
/// retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic identity derived from `(document_id, ordinal)`.
    pub id: String,
    pub document_id: String,
    /// Position within the document, contiguous from 0.
    pub ordinal: usize,
    pub text: String,
    pub byte_start: usize,
    pub byte_end: usize,
    pub char_start: usize,
    pub char_end: usize,
    /// Text shared with the preceding chunk (the overlap window).
    pub context: Option<String>,
    /// Most recent chapter heading at or before the chunk start.
    pub chapter: Option<String>,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// A vector produced by the embedding gateway for one chunk or query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// Chunk identity, or the query text for transient embeddings.
    pub subject: String,
    pub vector: Vec<f32>,
}

/// Metadata stored alongside every index entry; used for filtering.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub document_id: String,
    pub volume: Option<String>,
    pub chapter: Option<String>,
}

/// One row of the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub embedding: Embedding,
    pub chunk: Chunk,
    pub metadata: EntryMetadata,
}

impl IndexEntry {
    pub fn new(chunk: Chunk, vector: Vec<f32>, volume: Option<String>) -> Self {
        let metadata = EntryMetadata {
            document_id: chunk.document_id.clone(),
            volume,
            chapter: chunk.chapter.clone(),
        };
        Self {
            embedding: Embedding {
                subject: chunk.id.clone(),
                vector,
            },
            chunk,
            metadata,
        }
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk.id
    }

    pub fn vector(&self) -> &[f32] {
        &self.embedding.vector
    }
}

/// An index entry paired with its similarity to a query vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    pub score: f32,
}

/// Metadata restriction applied to nearest-neighbor queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub document_id: Option<String>,
    /// Matches case-insensitively, or by volume number (`"V3"` matches `"Volume 3"`).
    pub volume: Option<String>,
    pub chapter: Option<String>,
}

impl QueryFilter {
    pub fn volume(volume: impl Into<String>) -> Self {
        Self {
            volume: Some(volume.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.document_id.is_none() && self.volume.is_none() && self.chapter.is_none()
    }

    pub fn matches(&self, meta: &EntryMetadata) -> bool {
        if let Some(doc) = &self.document_id {
            if &meta.document_id != doc {
                return false;
            }
        }
        if let Some(wanted) = &self.volume {
            match &meta.volume {
                Some(have) if volumes_match(wanted, have) => {}
                _ => return false,
            }
        }
        if let Some(wanted) = &self.chapter {
            match &meta.chapter {
                Some(have) if have.eq_ignore_ascii_case(wanted) => {}
                _ => return false,
            }
        }
        true
    }
}

fn volumes_match(wanted: &str, have: &str) -> bool {
    if wanted.eq_ignore_ascii_case(have) {
        return true;
    }
    match (volume_number(wanted), volume_number(have)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Ingestion state of one document.
///
/// ```text
/// absent ──▶ pending ──▶ embedded
///               │  ▲         │
///               ▼  │         │ (content changed / forced)
///             failed         ▼
///                         pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Pending,
    Embedded,
    Failed,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Embedded => "embedded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "embedded" => Some(Self::Embedded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether `from → to` is a legal edge of the state machine.
    /// `from = None` means the document is absent from the registry.
    pub fn can_transition(from: Option<Self>, to: Self) -> bool {
        matches!(
            (from, to),
            (None, Self::Pending)
                | (Some(Self::Pending), Self::Embedded)
                | (Some(Self::Pending), Self::Failed)
                | (Some(Self::Failed), Self::Pending)
                | (Some(Self::Embedded), Self::Pending)
        )
    }
}

/// Durable ingestion record for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub document_id: String,
    pub status: IngestStatus,
    pub chunk_count: usize,
    pub fingerprint: String,
    pub updated_at: DateTime<Utc>,
    /// Number of ingestion attempts since the last success.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl RegistryRecord {
    /// Move `current` (or an absent record) to `pending` for `doc`.
    pub fn begin(current: Option<&RegistryRecord>, doc: &Document) -> Result<Self> {
        let from = current.map(|r| r.status);
        if !IngestStatus::can_transition(from, IngestStatus::Pending) {
            return Err(HarnessError::InvalidTransition {
                from,
                to: IngestStatus::Pending,
            });
        }
        let attempts = match current {
            Some(r) if r.status == IngestStatus::Failed => r.attempts + 1,
            _ => 1,
        };
        Ok(Self {
            document_id: doc.id.clone(),
            status: IngestStatus::Pending,
            chunk_count: current.map(|r| r.chunk_count).unwrap_or(0),
            fingerprint: doc.fingerprint.clone(),
            updated_at: Utc::now(),
            attempts,
            last_error: None,
        })
    }

    /// `pending → embedded` once every chunk is durably indexed.
    pub fn embedded(&self, chunk_count: usize) -> Result<Self> {
        self.check(IngestStatus::Embedded)?;
        Ok(Self {
            status: IngestStatus::Embedded,
            chunk_count,
            updated_at: Utc::now(),
            attempts: 0,
            last_error: None,
            ..self.clone()
        })
    }

    /// `pending → failed`, keeping the error for the next attempt.
    pub fn failed(&self, error: &str) -> Result<Self> {
        self.check(IngestStatus::Failed)?;
        Ok(Self {
            status: IngestStatus::Failed,
            chunk_count: 0,
            updated_at: Utc::now(),
            last_error: Some(error.to_string()),
            ..self.clone()
        })
    }

    fn check(&self, to: IngestStatus) -> Result<()> {
        if IngestStatus::can_transition(Some(self.status), to) {
            Ok(())
        } else {
            Err(HarnessError::InvalidTransition {
                from: Some(self.status),
                to,
            })
        }
    }
}

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Whether a turn finished normally or was cut short by cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    #[default]
    Complete,
    Incomplete,
}

/// One tool call made while answering a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub input: String,
    pub output: String,
    pub success: bool,
}

/// A single message in a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<ToolInvocation>,
    #[serde(default)]
    pub status: TurnStatus,
    pub at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            trace: Vec::new(),
            status: TurnStatus::Complete,
            at: Utc::now(),
        }
    }

    pub fn with_trace(mut self, trace: Vec<ToolInvocation>) -> Self {
        self.trace = trace;
        self
    }

    pub fn incomplete(mut self) -> Self {
        self.status = TurnStatus::Incomplete;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.status == TurnStatus::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_stable() {
        let a = Document::new("V1.txt", "hello");
        let b = Document::new("V1.txt", "hello");
        let c = Document::new("V1.txt", "hello!");
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);
    }

    #[test]
    fn test_volume_inference() {
        assert_eq!(infer_volume_label("V1.txt").as_deref(), Some("Volume 1"));
        assert_eq!(
            infer_volume_label("novels/vol_02.pdf").as_deref(),
            Some("Volume 2")
        );
        assert_eq!(
            infer_volume_label("Volume 10.md").as_deref(),
            Some("Volume 10")
        );
        assert_eq!(
            infer_volume_label("side-story.txt").as_deref(),
            Some("side-story")
        );
        // "v" inside a word is not a volume marker
        assert_eq!(infer_volume_label("novel.txt").as_deref(), Some("novel"));
    }

    #[test]
    fn test_volume_number() {
        assert_eq!(volume_number("V3"), Some(3));
        assert_eq!(volume_number("vol. 4"), Some(4));
        assert_eq!(volume_number("Volume 12"), Some(12));
        assert_eq!(volume_number("prologue"), None);
    }

    #[test]
    fn test_filter_matches_volume_by_number() {
        let meta = EntryMetadata {
            document_id: "V3.txt".into(),
            volume: Some("Volume 3".into()),
            chapter: None,
        };
        assert!(QueryFilter::volume("v3").matches(&meta));
        assert!(QueryFilter::volume("volume 3").matches(&meta));
        assert!(!QueryFilter::volume("V4").matches(&meta));
        assert!(QueryFilter::default().matches(&meta));
    }

    #[test]
    fn test_state_machine_edges() {
        use IngestStatus::*;
        assert!(IngestStatus::can_transition(None, Pending));
        assert!(IngestStatus::can_transition(Some(Pending), Embedded));
        assert!(IngestStatus::can_transition(Some(Pending), Failed));
        assert!(IngestStatus::can_transition(Some(Failed), Pending));
        assert!(IngestStatus::can_transition(Some(Embedded), Pending));
        assert!(!IngestStatus::can_transition(None, Embedded));
        assert!(!IngestStatus::can_transition(Some(Failed), Embedded));
        assert!(!IngestStatus::can_transition(Some(Embedded), Embedded));
    }

    #[test]
    fn test_record_lifecycle() {
        let doc = Document::new("V1.txt", "text");
        let pending = RegistryRecord::begin(None, &doc).unwrap();
        assert_eq!(pending.status, IngestStatus::Pending);
        assert_eq!(pending.attempts, 1);

        let failed = pending.failed("boom").unwrap();
        assert_eq!(failed.status, IngestStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("boom"));

        let retry = RegistryRecord::begin(Some(&failed), &doc).unwrap();
        assert_eq!(retry.attempts, 2);

        let done = retry.embedded(3).unwrap();
        assert_eq!(done.status, IngestStatus::Embedded);
        assert_eq!(done.chunk_count, 3);
        assert!(done.embedded(3).is_err());
    }
}
