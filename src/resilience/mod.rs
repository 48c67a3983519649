//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream call:
//!     → circuit_breaker.rs (fail fast while open, single probe when half-open)
//!     → timeouts.rs (per-attempt timeout, optional caller deadline)
//!     → caller-supplied classifier (success / transient / permanent)
//!     → retries.rs (transient only, exponential backoff via backoff.rs)
//!     → events.rs (transitions and retries reported to an injected sink)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream attempt has a deadline
//! - The engine knows nothing about HTTP; callers classify results
//! - Backoff sleeps suspend the task, never the runtime
//! - No ambient logger: events flow through [`events::ResilienceEvents`]

pub mod backoff;
pub mod circuit_breaker;
pub mod events;
pub mod policy;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use events::{RecordingEvents, ResilienceEvent, ResilienceEvents, TracingEvents};
pub use policy::{PolicyError, ResiliencePolicy};
pub use retries::RetryPolicy;
pub use timeouts::Deadline;

/// Classification of one call result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Retry-safe: network errors, timeouts, 408, 429, 5xx.
    TransientFailure,
    /// Caller errors and business rejections. Never retried.
    PermanentFailure,
}
