//! Retry schedule.
//!
//! # Responsibilities
//! - Decide whether another attempt is allowed
//! - Compute the delay before it (exponential, optionally jittered)
//!
//! # Design Decisions
//! - Only transient failures are retried; permanent failures and an open
//!   circuit end the call immediately
//! - The bound counts retries, so `max_retries = 3` means four attempts

use std::time::Duration;

use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base: u32,
    unit_ms: u64,
    max_delay_ms: u64,
    jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: config.backoff_base.max(1),
            unit_ms: config.backoff_unit_ms,
            max_delay_ms: config.max_delay_ms,
            jitter: config.jitter,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether retry number `retry` (1-based) is still allowed.
    pub fn allows(&self, retry: u32) -> bool {
        retry <= self.max_retries
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        calculate_backoff(retry, self.base, self.unit_ms, self.max_delay_ms, self.jitter)
    }

    /// The full schedule, useful for logging at startup.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_retries).map(|r| self.delay_for(r)).collect()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
