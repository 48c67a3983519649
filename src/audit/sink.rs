//! Audit sinks.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::audit::event::{AuditEvent, AuditEventKind};
use crate::observability::metrics;

/// Destination for audit events. Must not block.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits events as structured `tracing` records under target `audit`.
///
/// Request bodies are reported by size only.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        metrics::record_audit_event(event.kind.as_str());
        let body_bytes = event.request_body.as_ref().map(String::len);

        match event.kind {
            AuditEventKind::Security => tracing::warn!(
                target: "audit",
                kind = event.kind.as_str(),
                correlation_id = %event.correlation_id,
                actor = %event.actor,
                operation = %event.operation,
                result = event.result.as_str(),
                path = event.path.as_deref(),
                client_address = event.client_address.as_deref(),
                detail = event.detail.as_deref(),
                "Security event"
            ),
            AuditEventKind::Authentication => tracing::info!(
                target: "audit",
                kind = event.kind.as_str(),
                correlation_id = %event.correlation_id,
                actor = %event.actor,
                result = event.result.as_str(),
                client_address = event.client_address.as_deref(),
                detail = event.detail.as_deref(),
                "Authentication"
            ),
            AuditEventKind::DataAccess => tracing::info!(
                target: "audit",
                kind = event.kind.as_str(),
                correlation_id = %event.correlation_id,
                actor = %event.actor,
                operation = %event.operation,
                resource_kind = event.resource_kind.as_deref(),
                resource_id = event.resource_id.as_deref(),
                action = event.action.as_deref(),
                result = event.result.as_str(),
                "Data access"
            ),
            AuditEventKind::ApiCall => tracing::info!(
                target: "audit",
                kind = event.kind.as_str(),
                correlation_id = %event.correlation_id,
                actor = %event.actor,
                operation = %event.operation,
                method = event.method.as_deref(),
                path = event.path.as_deref(),
                status = event.status,
                duration_ms = event.duration_ms,
                client_address = event.client_address.as_deref(),
                body_bytes,
                result = event.result.as_str(),
                "API call"
            ),
        }
    }
}

/// Keeps events in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn of_kind(&self, kind: AuditEventKind) -> Vec<AuditEvent> {
        self.events.lock().iter().filter(|e| e.kind == kind).cloned().collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::event::AuditResult;

    #[test]
    fn test_memory_sink_filters_by_kind() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditEvent::new(AuditEventKind::ApiCall, "a", "Anonymous", "GetDraft", AuditResult::Success));
        sink.record(AuditEvent::new(AuditEventKind::Security, "b", "Anonymous", "RateLimit", AuditResult::Failure));

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.of_kind(AuditEventKind::Security)[0].correlation_id, "b");
        sink.clear();
        assert!(sink.events().is_empty());
    }
}
