//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (after correlation and peer authentication):
//!     → rate_limit.rs (per-client fixed window, 429 when exhausted)
//!     → ...inner stack and handler...
//!     → headers.rs (hardening headers on the way out)
//! ```
//!
//! # Design Decisions
//! - Limits apply before authentication enforcement and before audit
//! - Exempt paths match whole segments, case-insensitively

pub mod headers;
pub mod rate_limit;

pub use headers::security_headers_middleware;
pub use rate_limit::{rate_limit_middleware, Admission, RateLimiter};

/// Whether `path` equals one of `exempt` or continues it with a `/`.
pub fn path_is_exempt(path: &str, exempt: &[String]) -> bool {
    let path = path.to_ascii_lowercase();
    exempt.iter().any(|prefix| {
        let prefix = prefix.trim_end_matches('/').to_ascii_lowercase();
        if prefix.is_empty() {
            return false;
        }
        match path.strip_prefix(&prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    })
}
