//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP or TLS connection
//!     → server.rs (router, middleware stack, serving)
//!     → correlation.rs (assign or reuse the correlation id)
//!     → [transport, security and audit middleware]
//!     → handlers.rs (ping, health, forwarding)
//!     → response.rs (upstream response → client response)
//!     → Send to client
//! ```

pub mod correlation;
pub mod handlers;
pub mod response;
pub mod server;

pub use correlation::{CorrelationId, CorrelationIdExt, SKV_CORRELATION_ID, X_CORRELATION_ID};
pub use server::{build_router, AppState, GatewayServer};
