//! Retry policy for calls to external services
//!
//! Wraps a fallible, timeout-bounded async operation.
//!
//! **Algorithm:**
//! 1. Run the operation, bounded by the per-attempt timeout
//! 2. On success, return the result
//! 3. On a fatal error, return it immediately (no retry)
//! 4. On a transient or rate-limit error (a timed-out attempt counts as
//!    transient):
//!    a. If attempts remain: log WARN, sleep, retry
//!    b. Otherwise: log ERROR, return the last error
//!
//! **Delay before attempt `n` (n ≥ 2):**
//! - Fixed: `retry_delay`
//! - Linear: `retry_delay * (n - 1)`
//! - Exponential: `retry_delay * 2^(n - 2)`
//! - plus `rate_limit_delay` when the previous failure was rate-limit class

use crate::config::{Backoff, RetryConfig};
use std::future::Future;
use std::time::{Duration, Instant};

/// How a failure should be treated by [`RetryPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Network hiccup, 5xx, timeout
    Transient,
    /// Upstream asked us to slow down
    RateLimited,
    /// Retrying cannot help
    Fatal,
}

/// Errors usable with [`RetryPolicy`]
pub trait Retryable {
    fn retry_class(&self) -> RetryClass;

    /// Error value for an attempt cut off by the per-attempt timeout
    fn attempt_timed_out(after: Duration) -> Self;
}

/// Attempt budget, spacing and per-attempt timeout
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
    rate_limit_delay: Duration,
    backoff: Backoff,
    attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
            rate_limit_delay: Duration::ZERO,
            backoff: Backoff::Fixed,
            attempt_timeout,
        }
    }

    pub fn from_config(config: &RetryConfig, attempt_timeout: Duration) -> Self {
        Self::new(
            config.retry_attempts,
            Duration::from_millis(config.retry_delay_ms),
            attempt_timeout,
        )
        .with_rate_limit_delay(Duration::from_millis(config.rate_limit_delay_ms))
        .with_backoff(config.backoff)
    }

    pub fn with_rate_limit_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Pause before `attempt` (1-based) after a failure of class `previous`
    pub fn delay_before(&self, attempt: u32, previous: RetryClass) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let base = match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Linear => self.delay.saturating_mul(attempt - 1),
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor)
            }
        };

        if previous == RetryClass::RateLimited {
            base.saturating_add(self.rate_limit_delay)
        } else {
            base
        }
    }

    /// Run `operation` under this policy
    ///
    /// # Arguments
    /// * `operation_name` - Name for logging (e.g., "cdx page fetch")
    /// * `operation` - Closure producing a fresh attempt future each call
    pub async fn run<F, Fut, T, E>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let start_time = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let outcome = match tokio::time::timeout(self.attempt_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(E::attempt_timed_out(self.attempt_timeout)),
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms = start_time.elapsed().as_millis() as u64,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let class = err.retry_class();
            if class == RetryClass::Fatal {
                tracing::debug!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Non-retryable failure"
                );
                return Err(err);
            }

            if attempt >= self.attempts {
                tracing::error!(
                    operation = operation_name,
                    attempt,
                    elapsed_ms = start_time.elapsed().as_millis() as u64,
                    error = %err,
                    "Operation failed: retry budget exhausted"
                );
                return Err(err);
            }

            let pause = self.delay_before(attempt + 1, class);
            tracing::warn!(
                operation = operation_name,
                attempt,
                max_attempts = self.attempts,
                rate_limited = class == RetryClass::RateLimited,
                backoff_ms = pause.as_millis() as u64,
                error = %err,
                "Transient failure, will retry after backoff"
            );

            tokio::time::sleep(pause).await;
        }
    }
}
