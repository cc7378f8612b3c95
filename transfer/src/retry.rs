//! Jittered exponential backoff and an async retry helper.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::{TransferError, TransferResult};

/// Backoff base of a flush retry.
pub const FLUSH_RETRY_BASE_MS: u64 = 1_000;
/// Backoff cap of a flush retry.
pub const FLUSH_RETRY_MAX_MS: u64 = 30_000;
/// Number of attempts a flush makes before giving up.
pub const FLUSH_RETRY_MAX_ATTEMPTS: u32 = 15;

/// Returns a "full jitter" delay: a random value in `[0, min(max_ms, base_ms * 2^attempt)]`.
pub fn jitter(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let exponential = base_ms
        .saturating_mul(1u64 << attempt.min(32))
        .min(max_ms);
    let jitter = rand::rng().random_range(0..=exponential);

    Duration::from_millis(jitter)
}

/// Decides whether a failed attempt is retried.
pub type RetryablePredicate = fn(&TransferError) -> bool;

/// How [`with_retries`] spaces and bounds its attempts.
#[derive(Clone)]
pub struct RetryConfig {
    base_ms: u64,
    max_ms: u64,
    max_attempts: u32,
    is_retryable: RetryablePredicate,
}

impl RetryConfig {
    pub fn jitter(
        base_ms: u64,
        max_ms: u64,
        max_attempts: u32,
        is_retryable: RetryablePredicate,
    ) -> Self {
        Self {
            base_ms,
            max_ms,
            max_attempts: max_attempts.max(1),
            is_retryable,
        }
    }

    /// Retry policy used for merges and appends. Every error is retried.
    pub fn flush() -> Self {
        Self::jitter(
            FLUSH_RETRY_BASE_MS,
            FLUSH_RETRY_MAX_MS,
            FLUSH_RETRY_MAX_ATTEMPTS,
            |_| true,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay to wait after the failed attempt `attempt` (zero based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        jitter(self.base_ms, self.max_ms, attempt)
    }

    pub fn is_retryable(&self, err: &TransferError) -> bool {
        (self.is_retryable)(err)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::flush()
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("base_ms", &self.base_ms)
            .field("max_ms", &self.max_ms)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or runs out of
/// attempts. The closure receives the zero based attempt number.
pub async fn with_retries<T, F, Fut>(config: &RetryConfig, mut operation: F) -> TransferResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = TransferResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let is_last = attempt + 1 >= config.max_attempts;
                if is_last || !config.is_retryable(&err) {
                    return Err(err);
                }

                let backoff = config.backoff(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = config.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
