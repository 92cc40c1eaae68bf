//! Bounded retry with exponential backoff.
//!
//! Wraps one fallible async action. The wait before attempt `k` (k >= 2)
//! is `initial_delay * 2^(k-2)`; backoff sleeps go through the `Timer` so a
//! shutdown interrupts them.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use super::clock::Timer;
use crate::error::{ListerError, ListerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Treated as at least 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(3000),
        }
    }
}

impl RetryPolicy {
    /// Wait before `attempt` (1-based). Zero for the first attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.initial_delay.saturating_mul(factor)
    }
}

/// Run `action` until it succeeds or `policy.max_attempts` consecutive
/// failures occur.
pub async fn with_retry<T, E, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    timer: &Timer,
    mut action: F,
) -> ListerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            let delay = policy.delay_before(attempt);
            info!(
                operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Waiting before retry"
            );
            timer.sleep(delay).await?;
        }

        match action().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_error = format!("{e:#}");
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    error = %last_error,
                    "Attempt failed"
                );
            }
        }
    }

    Err(ListerError::ExhaustedRetries {
        operation: operation.to_string(),
        attempts: max_attempts,
        last_error,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
