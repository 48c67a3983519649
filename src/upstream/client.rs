//! Resilient client for the declaration API.

use std::time::Duration;

use axum::body::Bytes;
use axum::http::{header, HeaderValue, Method};
use url::Url;

use crate::auth::CredentialCache;
use crate::error::{wire_timestamp, GatewayError};
use crate::resilience::{CircuitSnapshot, Deadline, Outcome, ResiliencePolicy};
use crate::upstream::errors::{UpstreamError, UpstreamErrorPayload};

pub const SKV_CLIENT_CORRELATION_ID: &str = "skv_client_correlation_id";
pub const SKV_CALL_TIMESTAMP: &str = "skv_call_timestamp";
pub const SKV_USER: &str = "skv_user";

/// A call to forward, relative to the upstream base URL.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Relative path such as `utkast/5566778899/202401`.
    pub path: String,
    pub query: Option<String>,
    pub body: Option<Bytes>,
    pub content_type: Option<HeaderValue>,
}

impl UpstreamRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            body: None,
            content_type: None,
        }
    }
}

/// Per-request information the upstream wants echoed.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub correlation_id: String,
    pub user: Option<String>,
    pub deadline: Option<Deadline>,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: CredentialCache,
    policy: ResiliencePolicy,
}

impl UpstreamClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        credentials: CredentialCache,
        policy: ResiliencePolicy,
    ) -> Result<Self, url::ParseError> {
        let base = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        Ok(Self {
            http,
            base_url: Url::parse(&base)?,
            credentials,
            policy,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn credentials(&self) -> &CredentialCache {
        &self.credentials
    }

    pub fn circuit(&self) -> CircuitSnapshot {
        self.policy.breaker().snapshot()
    }

    fn url_for(&self, path: &str, query: Option<&str>) -> Result<Url, UpstreamError> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;
        url.set_query(query);
        Ok(url)
    }

    /// Forward under retry and circuit breaking.
    pub async fn send(
        &self,
        request: &UpstreamRequest,
        context: &RequestContext,
    ) -> Result<UpstreamResponse, GatewayError> {
        let url = self.url_for(&request.path, request.query.as_deref())?;
        let url = &url;

        self.policy
            .execute(
                move |attempt| self.attempt(url, request, context, attempt),
                |result: &Result<UpstreamResponse, UpstreamError>| match result {
                    Ok(_) => Outcome::Success,
                    Err(e) => e.outcome(),
                },
                context.deadline,
            )
            .await
            .map_err(GatewayError::from)
    }

    async fn attempt(
        &self,
        url: &Url,
        request: &UpstreamRequest,
        context: &RequestContext,
        attempt: u32,
    ) -> Result<UpstreamResponse, UpstreamError> {
        // Fetched per attempt so a retry after invalidation gets a new token.
        let credential = self
            .credentials
            .get_token()
            .await
            .map_err(UpstreamError::Credential)?;

        let mut builder = self
            .http
            .request(request.method.clone(), url.clone())
            .header(header::AUTHORIZATION, credential.authorization())
            .header(SKV_CLIENT_CORRELATION_ID, context.correlation_id.as_str())
            .header(SKV_CALL_TIMESTAMP, wire_timestamp())
            .header(header::ACCEPT, "application/json")
            .header(header::ACCEPT_LANGUAGE, "sv-SE");

        if let Some(user) = context.user.as_deref().and_then(|u| HeaderValue::from_str(u).ok()) {
            builder = builder.header(SKV_USER, user);
        }
        if let Some(body) = &request.body {
            if let Some(content_type) = &request.content_type {
                builder = builder.header(header::CONTENT_TYPE, content_type.clone());
            }
            builder = builder.body(body.clone());
        }

        tracing::debug!(method = %request.method, path = %url.path(), attempt, "Calling upstream");

        let response = builder
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.without_url().to_string()))?;

        let status = response.status().as_u16();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Network(e.without_url().to_string()))?;

        if (200..300).contains(&status) {
            tracing::debug!(status, attempt, "Upstream responded");
            return Ok(UpstreamResponse {
                status,
                content_type,
                body,
            });
        }

        if status == 401 {
            tracing::warn!("Upstream refused the bearer token, invalidating cached credential");
            self.credentials.invalidate_default();
        }

        let payload = serde_json::from_slice::<UpstreamErrorPayload>(&body).ok();
        tracing::warn!(
            status,
            attempt,
            code = payload.as_ref().and_then(|p| p.code.as_deref()),
            "Upstream returned an error"
        );
        Err(UpstreamError::Status { status, payload })
    }

    /// Unauthenticated `GET ping`, outside the circuit breaker.
    pub async fn ping(&self, timeout: Duration) -> Result<u16, UpstreamError> {
        let url = self.url_for("ping", None)?;
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.without_url().to_string()))?;
        Ok(response.status().as_u16())
    }
}
