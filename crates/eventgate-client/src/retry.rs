//! Retry with exponential backoff for broker calls.
//!
//! Used by the producer's background connect task before it settles the
//! readiness gate. Only `ClientError::BrokerUnavailable` is retried; every
//! other error is returned immediately. Each attempt is logged with the
//! broker host it was made against.
//!
//! ```text
//! backoff = min(initial_backoff * multiplier^attempt, max_backoff)
//!
//! With defaults (100ms initial, 2x multiplier, 10s max):
//! - Attempt 1: immediate
//! - Attempt 2: 100ms
//! - Attempt 3: 200ms
//! - Attempt 4: 400ms
//! ```

use crate::error::Result;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Retry policy configuration for exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first call
    pub max_retries: usize,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: usize,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        }
    }

    /// A policy that gives up after the first failure.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff to wait before retry number `attempt` (0-indexed).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let backoff_ms =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff = Duration::from_millis(backoff_ms as u64);
        backoff.min(self.max_backoff)
    }
}

/// Run a call against the broker at `host` until it succeeds, fails with a
/// non-retryable error, or `policy.max_retries` retries have been spent.
///
/// The last error is returned when retries run out.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    host: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(host = host, attempts = attempt + 1, "Broker reachable after retrying");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !error.is_retryable() {
            warn!(host = host, error = %error, "Broker rejected the call");
            return Err(error);
        }
        if attempt >= policy.max_retries {
            warn!(
                host = host,
                attempts = attempt + 1,
                error = %error,
                "Broker still unreachable, out of retries"
            );
            return Err(error);
        }

        let backoff = policy.backoff(attempt);
        debug!(
            host = host,
            attempt = attempt + 1,
            retry_in_ms = backoff.as_millis() as u64,
            error = %error,
            "Broker unreachable, retrying"
        );
        sleep(backoff).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_growth_is_capped() {
        let policy = RetryPolicy::new(
            10,
            Duration::from_millis(100),
            Duration::from_millis(500),
            2.0,
        );
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(500));
        assert_eq!(policy.backoff(9), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = retry_with_backoff(&policy, "mem:9092", || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ClientError::BrokerUnavailable("refused".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10), Duration::from_secs(1), 2.0);
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<()> = retry_with_backoff(&policy, "mem:9092", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::BrokerUnavailable("refused".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(ClientError::BrokerUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<()> = retry_with_backoff(&policy, "mem:9092", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::TopicNotFound("orders".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(ClientError::TopicNotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
