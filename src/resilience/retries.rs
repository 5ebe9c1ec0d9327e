//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether another attempt is allowed
//! - Compute the jittered backoff before that attempt
//!
//! # Design Decisions
//! - The same policy type drives work-item retries and outbound call retries
//! - Callers classify errors; the policy only counts attempts
//! - Jittered backoff prevents thundering herd

use std::time::Duration;

use super::backoff::calculate_backoff;
use crate::config::{RetryConfig, WorkerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Policy for re-running failed work items.
    pub fn for_workers(config: &WorkerConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.retry_base_delay_ms),
            Duration::from_millis(config.retry_max_delay_ms),
        )
    }

    /// Policy for outbound API calls.
    pub fn for_calls(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Whether a failure after `retries_so_far` retries may be retried again.
    pub fn allows_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        calculate_backoff(retry, self.base_delay, self.max_delay)
    }
}
