//! Retry policy for completion calls.
//!
//! Kept separate from the client so it can be exercised against fake, flaky
//! providers.

use std::future::Future;
use std::time::Duration;

use autotree_types::{AttackTreeError, Result};

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone)]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential { base: Duration, max: Duration },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let millis =
                    (base.as_millis() as u64).saturating_mul(2u64.saturating_pow(attempt as u32));
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_secs(2),
            max: Duration::from_secs(30),
        }
    }
}

/// How many times, how long, and on which failures to retry.
///
/// Rate limits are always retried. Server errors and timeouts are retried
/// only when `retry_server_errors` is set. Everything else fails at once.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Values below 1 act as 1.
    pub max_attempts: usize,
    pub backoff: BackoffPolicy,
    pub retry_server_errors: bool,
    /// Upper bound on a provider's retry-after hint.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffPolicy::default(),
            retry_server_errors: false,
            max_retry_after: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_retry_server_errors(mut self, retry: bool) -> Self {
        self.retry_server_errors = retry;
        self
    }

    pub fn with_max_retry_after(mut self, max: Duration) -> Self {
        self.max_retry_after = max;
        self
    }

    pub fn should_retry(&self, err: &AttackTreeError) -> bool {
        match err {
            AttackTreeError::RateLimited { .. } => true,
            AttackTreeError::ProviderError { retryable: true, .. }
            | AttackTreeError::RequestTimeout { .. } => self.retry_server_errors,
            _ => false,
        }
    }

    /// Delay before the next attempt: the backoff delay, or the provider's
    /// retry-after hint when that is longer. The hint is capped at
    /// `max_retry_after`.
    pub fn delay_for(&self, attempt: usize, err: &AttackTreeError) -> Duration {
        let hint = Duration::from_millis(err.retry_after_ms().unwrap_or(0))
            .min(self.max_retry_after);
        self.backoff.delay_for_attempt(attempt).max(hint)
    }
}

/// Run `f` under `policy`.
///
/// Returns the first success, the first non-retryable error unchanged, or
/// [`AttackTreeError::RetriesExhausted`] once every attempt failed with a
/// retryable error.
pub async fn execute_with_retry<T, F, Fut>(f: F, policy: &RetryPolicy, operation: &str) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_err = None;
    for attempt in 0..attempts {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(&e) => {
                if attempt + 1 < attempts {
                    let delay = policy.delay_for(attempt, &e);
                    tracing::warn!(
                        operation = %operation,
                        attempt,
                        delay_ms = %delay.as_millis(),
                        error = %e,
                        "Retryable error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    tracing::error!(operation = %operation, attempts, "Retry budget exhausted");
    Err(AttackTreeError::RetriesExhausted {
        attempts,
        last_error: last_err.map(|e| e.to_string()).unwrap_or_default(),
    })
}
