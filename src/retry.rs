//! Randomized exponential backoff for upstream calls.
//!
//! # Retry Strategy
//!
//! - [`RagError::Transient`] → retry, up to `max_attempts` total attempts
//! - any other error → fail immediately, no budget consumed
//! - delay before retry `n`: `exp = min(cap, base · 2^(n-1))`, then
//!   `min(cap, exp + uniform(0, exp))`, never shorter than the previous delay
//!
//! With the defaults (6 attempts, 1s base, 60s cap) the worst case sleeps
//! roughly 1-2s, 2-4s, 4-8s, 8-16s, 16-32s between attempts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{RagError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Bookkeeping for one outbound call. Dropped on success or final failure.
struct RetryState {
    attempt: u32,
    last_delay: Duration,
    last_error: Option<RagError>,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Deterministic exponential component for retry `retry` (1-based),
    /// capped at `max_delay`.
    pub fn exponential(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(31);
        let factor = 1u32 << shift;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Randomized delay for retry `retry`, in `[exp, min(cap, 2·exp)]`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = self.exponential(retry);
        let exp_ms = exp.as_millis() as u64;
        let jitter_ms = if exp_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=exp_ms)
        };
        (exp + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails with a non-transient error,
    /// or `max_attempts` attempts have been made. The closure receives the
    /// 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut state = RetryState {
            attempt: 0,
            last_delay: Duration::ZERO,
            last_error: None,
        };

        loop {
            state.attempt += 1;

            let err = match operation(state.attempt).await {
                Ok(value) => {
                    if let Some(prev) = state.last_error.take() {
                        debug!(
                            what,
                            attempt = state.attempt,
                            recovered_from = %prev,
                            "upstream call succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(err);
            }

            if state.attempt >= self.max_attempts {
                warn!(
                    what,
                    attempts = state.attempt,
                    error = %err,
                    "giving up after exhausting retry budget"
                );
                return Err(err);
            }

            let delay = self.backoff(state.attempt).max(state.last_delay);
            warn!(
                what,
                attempt = state.attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient upstream failure, retrying"
            );
            state.last_delay = delay;
            state.last_error = Some(err);
            tokio::time::sleep(delay).await;
        }
    }
}
