//! Upstream health subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer (active.rs)
//!     → GET <base>/ping with a short timeout
//!     → healthy / degraded / unhealthy
//!     → state.rs (atomically swapped report)
//!     → read by /health and /admin/status
//! ```
//!
//! # Design Decisions
//! - Probes bypass the circuit breaker so they reflect the real upstream
//! - The report is advisory; it never blocks forwarding

pub mod active;
pub mod state;

pub use active::{HealthMonitor, Probe};
pub use state::{HealthReport, HealthState, HealthStatus};
