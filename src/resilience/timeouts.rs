//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound every upstream attempt
//! - Bound a whole execution (attempts plus backoff) by a caller deadline
//!
//! # Design Decisions
//! - Uses Tokio's timer so paused-clock tests stay deterministic
//! - Running out of time is a transient failure, never a silent hang

use std::time::Duration;

use tokio::time::Instant;

/// Absolute point in time by which an execution must finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Self(Instant::now() + duration)
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Time budget for the next attempt: the per-attempt timeout, shortened to
/// whatever the deadline leaves. `None` when the deadline already passed.
pub fn attempt_budget(attempt_timeout: Duration, deadline: Option<Deadline>) -> Option<Duration> {
    match deadline {
        None => Some(attempt_timeout),
        Some(d) if d.is_expired() => None,
        Some(d) => Some(attempt_timeout.min(d.remaining())),
    }
}
