//! Upstream declaration API.
//!
//! # Data Flow
//! ```text
//! Forwarding handler
//!     → client.rs (build URL against the active environment)
//!     → ResiliencePolicy (breaker permit, per-attempt timeout)
//!         → CredentialCache (bearer token, per attempt)
//!         → reqwest (mTLS client identity, skv_* headers)
//!         → errors.rs (classify status, parse error payload)
//!     → UpstreamResponse or GatewayError
//! ```
//!
//! # Design Decisions
//! - 401 from a resource endpoint invalidates the cached credential
//! - Upstream error text never reaches the caller; known codes are mapped

pub mod client;
pub mod errors;

pub use client::{RequestContext, UpstreamClient, UpstreamRequest, UpstreamResponse};
pub use errors::{UpstreamError, UpstreamErrorPayload};
