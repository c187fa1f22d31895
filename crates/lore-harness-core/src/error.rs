//! Error taxonomy shared by every Lore Harness component.
//!
//! Each variant maps to one failure class with a fixed recovery policy:
//!
//! | Variant | Policy |
//! |---------|--------|
//! | [`InvalidConfig`](HarnessError::InvalidConfig) | fatal, caller error |
//! | [`Load`](HarnessError::Load) | retryable |
//! | [`EmbeddingUnavailable`](HarnessError::EmbeddingUnavailable) | retryable with backoff |
//! | [`VectorStoreUnavailable`](HarnessError::VectorStoreUnavailable) | retryable with backoff |
//! | [`RegistryUnavailable`](HarnessError::RegistryUnavailable) | retryable with backoff |
//! | [`LlmUnavailable`](HarnessError::LlmUnavailable) | retryable with backoff |
//! | [`DimensionMismatch`](HarnessError::DimensionMismatch) | fatal, configuration bug |
//! | [`ToolBudgetExceeded`](HarnessError::ToolBudgetExceeded) | recoverable, best-effort answer |
//! | [`ToolFailed`](HarnessError::ToolFailed) | recoverable, router degrades |
//! | [`IngestionFailed`](HarnessError::IngestionFailed) | recorded as `failed`, retried next run |

use crate::models::IngestStatus;

/// Convenience alias used across the core crate.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Top-level error type for Lore Harness.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to load '{path}': {reason}")]
    Load { path: String, reason: String },

    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("vector store unavailable: {0}")]
    VectorStoreUnavailable(String),

    #[error("ingestion registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("LLM service unavailable: {0}")]
    LlmUnavailable(String),

    #[error("vector dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("tool call budget of {budget} exhausted before the plan completed")]
    ToolBudgetExceeded { budget: usize },

    #[error("tool '{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("ingestion of '{document}' failed: {reason}")]
    IngestionFailed { document: String, reason: String },

    #[error("invalid registry transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: Option<IngestStatus>,
        to: IngestStatus,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl HarnessError {
    /// Whether the failure is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Load { .. }
                | Self::EmbeddingUnavailable(_)
                | Self::VectorStoreUnavailable(_)
                | Self::RegistryUnavailable(_)
                | Self::LlmUnavailable(_)
        )
    }
}
