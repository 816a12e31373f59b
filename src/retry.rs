//! Per-call timeout and bounded retry for outbound service calls.
//!
//! Every call to the language model, the web search API and the course index
//! goes through [`RetryPolicy::run`]: the call is bounded by a timeout, and a
//! failure (timeout included) is retried after a jittered backoff until the
//! attempt budget is spent.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::{AdvisorError, IndexError, LlmError, SearchError};

/// Errors that the retry loop knows how to classify and synthesize.
pub trait Retryable: std::fmt::Display {
    /// Whether another attempt could plausibly succeed.
    fn is_retryable(&self) -> bool {
        true
    }

    /// The error to report when a call exceeds its timeout.
    fn timed_out(after: Duration) -> Self;
}

impl Retryable for LlmError {
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::AuthFailed { .. })
    }

    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }
}

impl Retryable for SearchError {
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::Http { status: 400..=403, .. })
    }

    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }
}

impl Retryable for IndexError {
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidRecord(_) | Self::Http { status: 400..=403, .. })
    }

    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }
}

impl Retryable for AdvisorError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Llm(e) => e.is_retryable(),
            // Handled by the stricter-prompt path instead.
            Self::Malformed { .. } => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        Self::Llm(LlmError::Timeout(after))
    }
}

/// Timeout and retry settings for one class of outbound calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for each further retry.
    pub base_backoff: Duration,
    /// Upper bound on a single attempt.
    pub call_timeout: Duration,
    /// Add up to 25% random jitter to each backoff.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_backoff: Duration::from_millis(500),
            call_timeout: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy with no backoff and no jitter, for tests.
    pub fn immediate(call_timeout: Duration) -> Self {
        Self {
            max_attempts: 2,
            base_backoff: Duration::ZERO,
            call_timeout,
            jitter: false,
        }
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        let base = self.base_backoff.saturating_mul(factor);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let spread = (base.as_millis() / 4) as u64;
        let extra = rand::thread_rng().gen_range(0..=spread);
        base + Duration::from_millis(extra)
    }

    /// Run `op` under the timeout, retrying retryable failures.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(E::timed_out(self.call_timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    let delay = self.backoff_for(attempt);
                    warn!(
                        label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Outbound call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn retries_once_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(Duration::from_secs(1));
        let result: Result<&str, LlmError> = policy
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(LlmError::RequestFailed {
                        provider: "stub".into(),
                        reason: "boom".into(),
                    })
                } else {
                    Ok("ok")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(Duration::from_secs(1));
        let result: Result<(), SearchError> = policy
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SearchError::RequestFailed("down".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(Duration::from_millis(20));
        let result: Result<(), LlmError> = policy
            .run("slow", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(LlmError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn malformed_output_is_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(Duration::from_secs(1));
        let result: Result<(), AdvisorError> = policy
            .run("judge", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AdvisorError::Malformed {
                    task: "judge",
                    reason: "not json".into(),
                })
            })
            .await;
        assert!(matches!(result, Err(AdvisorError::Malformed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles_without_jitter() {
        let policy = RetryPolicy {
            base_backoff: Duration::from_millis(100),
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let policy = RetryPolicy {
            base_backoff: Duration::from_millis(400),
            jitter: true,
            ..RetryPolicy::default()
        };
        for _ in 0..20 {
            let delay = policy.backoff_for(1);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(500));
        }
    }
}
