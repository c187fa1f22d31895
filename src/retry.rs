//! Deadline-and-backoff wrapper for remote calls.
//!
//! Every call to an embedding model, chat model or persistent store from the
//! pipeline, retriever and agent goes through [`with_backoff`]:
//!
//! - each attempt runs under `tokio::time::timeout`; an elapsed deadline
//!   becomes a retryable error of the caller's failure class
//! - retryable errors ([`HarnessError::is_retryable`]) back off exponentially,
//!   `base × 2^(attempt-1)`, capped at `max_delay`
//! - non-retryable errors return immediately

use std::future::Future;
use std::time::Duration;

use lore_harness_core::{HarnessError, Result};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Deadline for a single attempt.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, timeout: Duration) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            timeout,
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Classify a failed HTTP response.
///
/// 429 and 5xx are transient and map to `kind`; any other status means the
/// request itself is wrong (bad model name, bad key) and is not retried.
pub fn http_failure(
    kind: fn(String) -> HarnessError,
    service: &str,
    status: reqwest::StatusCode,
    body: &str,
) -> HarnessError {
    let msg = format!("{} returned {}: {}", service, status, body.trim());
    if status.as_u16() == 429 || status.is_server_error() {
        kind(msg)
    } else {
        HarnessError::InvalidConfig(msg)
    }
}

/// Run `op` under `policy`.
///
/// `kind` builds the error reported when an attempt times out, e.g.
/// `HarnessError::EmbeddingUnavailable`.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    kind: fn(String) -> HarnessError,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(r) => r,
            Err(_) => Err(kind(format!(
                "{} timed out after {:?}",
                label, policy.timeout
            ))),
        };

        match result {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = label,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(200))
            .with_base_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = RetryPolicy::new(10, Duration::from_secs(1));
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(4), Duration::from_secs(8));
        assert_eq!(p.delay_for(9), Duration::from_secs(32));
    }

    #[test]
    fn test_http_failure_classes() {
        use reqwest::StatusCode;
        let kind = HarnessError::EmbeddingUnavailable;
        assert!(http_failure(kind, "ollama", StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(http_failure(kind, "ollama", StatusCode::BAD_GATEWAY, "").is_retryable());
        let e = http_failure(kind, "ollama", StatusCode::NOT_FOUND, "model not found");
        assert!(matches!(e, HarnessError::InvalidConfig(ref m) if m.contains("model not found")));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let out = with_backoff(&fast(3), "op", HarnessError::EmbeddingUnavailable, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(HarnessError::EmbeddingUnavailable("503".into()))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let err = with_backoff(&fast(2), "op", HarnessError::LlmUnavailable, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(HarnessError::LlmUnavailable("down".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, HarnessError::LlmUnavailable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_not_retried() {
        let calls = AtomicU32::new(0);
        let err = with_backoff(&fast(5), "op", HarnessError::EmbeddingUnavailable, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(HarnessError::DimensionMismatch {
                expected: 4,
                actual: 3,
            })
        })
        .await
        .unwrap_err();
        assert!(matches!(err, HarnessError::DimensionMismatch { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_retryable_of_same_kind() {
        let policy = RetryPolicy::new(1, Duration::from_millis(10))
            .with_base_delay(Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let err = with_backoff(&policy, "slow embed", HarnessError::EmbeddingUnavailable, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, HarnessError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, HarnessError::EmbeddingUnavailable(ref m) if m.contains("timed out")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
