//! Retry with exponential backoff
//!
//! Every outbound call (origin fetch, transform, sitemap fetch) runs through
//! a [`RetryPolicy`]. Each attempt is bounded by its own timeout; only
//! transient failures are retried.

use std::future::Future;
use std::time::Duration;

/// Errors that can tell whether another attempt might succeed
pub trait RetryableError: std::fmt::Display {
    /// True for network timeouts, 5xx responses and explicit rate limits
    fn is_transient(&self) -> bool;
}

/// Retry parameters for one class of outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is this plus one
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(5_000),
            max_delay: Duration::from_millis(30_000),
            attempt_timeout: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt
    pub fn no_retry(attempt_timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            attempt_timeout,
        }
    }

    /// Backoff before retry number `retry` (1-based)
    ///
    /// `initial_delay * 2^(retry-1)`, capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.checked_pow(retry - 1).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Runs `attempt` until it succeeds, fails permanently or retries run out
    ///
    /// `on_timeout` builds the error reported when an attempt exceeds
    /// `attempt_timeout`; that error is retried like any other transient one
    /// if it says so.
    pub async fn run<T, E, F, Fut, G>(&self, operation: &str, mut attempt: F, on_timeout: G) -> Result<T, E>
    where
        E: RetryableError,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: Fn() -> E,
    {
        let mut retry = 0;

        loop {
            let result = match tokio::time::timeout(self.attempt_timeout, attempt()).await {
                Ok(result) => result,
                Err(_) => Err(on_timeout()),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && retry < self.max_retries => {
                    retry += 1;
                    let delay = self.delay_for(retry);
                    tracing::warn!(
                        operation,
                        retry,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if retry > 0 {
                        tracing::debug!(operation, attempts = retry + 1, error = %err, "Giving up");
                    }
                    return Err(err);
                }
            }
        }
    }
}
