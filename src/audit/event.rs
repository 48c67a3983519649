//! Audit event model.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditEventKind {
    ApiCall,
    DataAccess,
    Authentication,
    Security,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::ApiCall => "api-call",
            AuditEventKind::DataAccess => "data-access",
            AuditEventKind::Authentication => "authentication",
            AuditEventKind::Security => "security",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditResult {
    Success,
    Failure,
}

impl AuditResult {
    pub fn from_status(status: u16) -> Self {
        if status < 400 {
            AuditResult::Success
        } else {
            AuditResult::Failure
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditResult::Success => "SUCCESS",
            AuditResult::Failure => "FAILURE",
        }
    }
}

/// One write-once audit record.
///
/// Fields that do not apply to a kind are `None`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub actor: String,
    pub operation: String,
    pub result: AuditResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_address: Option<String>,
    /// Captured POST/PUT body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    /// Free-form reason for authentication and security events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind, correlation_id: impl Into<String>, actor: impl Into<String>, operation: impl Into<String>, result: AuditResult) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            correlation_id: correlation_id.into(),
            actor: actor.into(),
            operation: operation.into(),
            result,
            resource_kind: None,
            resource_id: None,
            action: None,
            method: None,
            path: None,
            status: None,
            duration_ms: None,
            client_address: None,
            request_body: None,
            detail: None,
        }
    }

    pub fn with_request(mut self, method: &str, path: &str) -> Self {
        self.method = Some(method.to_string());
        self.path = Some(path.to_string());
        self
    }

    pub fn with_client_address(mut self, address: Option<String>) -> Self {
        self.client_address = address;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
