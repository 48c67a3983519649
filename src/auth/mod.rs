//! Upstream credential subsystem.
//!
//! # Data Flow
//! ```text
//! UpstreamClient needs a bearer token
//!     → credentials.rs (fresh cached credential? return it)
//!     → miss: join the pending exchange, or start one
//!     → endpoint.rs (client-credentials POST to the token endpoint)
//!     → cache with TTL = expires_in - safety margin
//! ```
//!
//! # Design Decisions
//! - Single-flight per scope: one exchange, many waiters
//! - Failures are never cached; the next caller tries again
//! - Token values are `SecretString` and never logged

pub mod credentials;
pub mod endpoint;

use thiserror::Error;

pub use credentials::{Credential, CredentialCache, CredentialStatus};
pub use endpoint::{OAuthTokenEndpoint, TokenEndpoint, TokenResponse};

/// Why no credential could be obtained.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("token endpoint returned {status}")]
    Rejected { status: u16, body: String },

    #[error("token endpoint unreachable: {0}")]
    Transport(String),

    #[error("malformed token response: {0}")]
    Malformed(String),

    #[error("token lifetime {expires_in}s does not exceed the {margin}s safety margin")]
    LifetimeTooShort { expires_in: u64, margin: u64 },

    #[error("credential exchange aborted")]
    Aborted,
}
