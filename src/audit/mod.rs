//! Audit pipeline.
//!
//! # Data Flow
//! ```text
//! Request (correlation id and peer result already attached)
//!     → middleware.rs (capture method, path, actor, POST/PUT body)
//!     → handler runs, response returned unmodified
//!     → operation.rs (operation name, data-access classification)
//!     → sink.rs (api-call event, plus data-access event when applicable)
//! ```
//!
//! Authentication and security events are emitted by the transport and rate
//! limit middleware through the same [`AuditSink`].
//!
//! # Design Decisions
//! - Sinks are injected, never global
//! - Recording is synchronous and non-blocking; sinks must not do I/O inline
//! - Exempt paths (health, ping, swagger) produce no events

pub mod event;
pub mod middleware;
pub mod operation;
pub mod sink;

pub use event::{AuditEvent, AuditEventKind, AuditResult};
pub use middleware::audit_middleware;
pub use sink::{AuditSink, MemoryAuditSink, TracingAuditSink};
