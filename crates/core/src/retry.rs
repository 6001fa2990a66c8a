use crate::error::{EmbeddingError, StoreError, StructuredExtractionError};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Error types that can represent an attempt which ran out of time.
pub trait FromTimeout {
    fn from_timeout(limit: Duration) -> Self;
}

impl FromTimeout for EmbeddingError {
    fn from_timeout(limit: Duration) -> Self {
        EmbeddingError::Timeout(limit.as_millis())
    }
}

impl FromTimeout for StructuredExtractionError {
    fn from_timeout(limit: Duration) -> Self {
        StructuredExtractionError::Timeout(limit.as_millis())
    }
}

impl FromTimeout for StoreError {
    fn from_timeout(limit: Duration) -> Self {
        StoreError::Timeout(limit.as_millis())
    }
}

/// Per-attempt timeout plus a bounded number of attempts with exponential backoff.
#[serde_as]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "base_delay_ms")]
    pub base_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "timeout_ms")]
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            timeout,
        }
    }

    /// Single attempt, no backoff.
    pub fn once(timeout: Duration) -> Self {
        Self::new(1, Duration::ZERO, timeout)
    }

    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FromTimeout + Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(E::from_timeout(self.timeout)),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(error) if attempt >= attempts => return Err(error),
                Err(error) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(operation, attempt, %error, delay_ms = delay.as_millis() as u64, "retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn attempts_are_at_least_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn policy_reads_millisecond_fields() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts": 2, "timeout_ms": 1500}"#).unwrap();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.timeout, Duration::from_millis(1500));
        assert_eq!(policy.base_delay, RetryPolicy::default().base_delay);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO, Duration::from_secs(1));

        let result: Result<usize, StoreError> = policy
            .run("flaky", || async {
                let seen = calls.fetch_add(1, Ordering::SeqCst);
                if seen < 2 {
                    Err(StoreError::Request("not yet".into()))
                } else {
                    Ok(seen)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(2, Duration::ZERO, Duration::from_secs(1));

        let result: Result<(), StoreError> = policy
            .run("always-failing", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Request("down".into()))
            })
            .await;

        assert!(matches!(result, Err(StoreError::Request(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slow_attempts_time_out() {
        let policy = RetryPolicy::once(Duration::from_millis(10));

        let result: Result<(), EmbeddingError> = policy
            .run("slow", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(EmbeddingError::Timeout(10))));
    }
}
