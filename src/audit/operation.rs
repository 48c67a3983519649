//! Mapping request paths to business operations.

use axum::http::Method;

pub const RESOURCE_KIND: &str = "VatDeclaration";

/// Operation name for a request, from its path segments and method.
pub fn operation_name(path: &str, method: &Method) -> &'static str {
    let lower = path.to_ascii_lowercase();
    let segments: Vec<&str> = lower.split('/').filter(|s| !s.is_empty()).collect();
    let has = |name: &str| segments.iter().any(|s| *s == name);

    if has("utkast") {
        match *method {
            Method::GET => "GetDraft",
            Method::POST => "CreateDraft",
            Method::DELETE => "DeleteDraft",
            _ => "UtkastOperation",
        }
    } else if has("kontrollera") {
        "ValidateDraft"
    } else if has("las") {
        match *method {
            Method::PUT => "LockDraft",
            Method::DELETE => "UnlockDraft",
            _ => "LockOperation",
        }
    } else if has("inlamnat") {
        "GetSubmitted"
    } else if has("beslutat") {
        "GetDecided"
    } else {
        "UnknownOperation"
    }
}

pub fn is_data_access(operation: &str) -> bool {
    matches!(
        operation,
        "GetDraft" | "CreateDraft" | "DeleteDraft" | "GetSubmitted" | "GetDecided" | "ValidateDraft"
    )
}

/// `organisation/period` from the last two segments of a path with at
/// least four segments.
pub fn resource_id(path: &str) -> Option<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 4 {
        return None;
    }
    let n = segments.len();
    Some(format!("{}/{}", segments[n - 2], segments[n - 1]))
}

pub fn action(method: &Method) -> &'static str {
    match *method {
        Method::GET => "READ",
        Method::POST => "CREATE",
        Method::PUT => "UPDATE",
        Method::DELETE => "DELETE",
        _ => "UNKNOWN",
    }
}
