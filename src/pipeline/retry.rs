use super::CancellationToken;
use crate::error::{LoadError, Result};
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// Bounded retry with exponential backoff for retryable store errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after failed attempt number `attempt` (1-based):
    /// `base * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// Run `op` until it succeeds, fails terminally, or runs out of attempts.
    ///
    /// Terminal errors come back untouched. A retryable error that is still
    /// failing on the last attempt comes back as `RetriesExhausted`, which is
    /// itself terminal. Cancellation between attempts abandons the statement
    /// with `Cancelled`; the failed attempt was already rolled back.
    pub fn run<T, F>(&self, token: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                return Err(LoadError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            if token.is_cancelled() {
                return Err(LoadError::Cancelled);
            }

            let delay = self.delay_for(attempt);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retryable store error"
            );
            if !sleep_unless_cancelled(delay, token) {
                return Err(LoadError::Cancelled);
            }
            attempt += 1;
        }
    }
}

/// Returns false if the token was cancelled during the sleep.
fn sleep_unless_cancelled(delay: Duration, token: &CancellationToken) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
