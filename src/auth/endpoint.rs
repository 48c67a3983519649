//! Token endpoint client (OAuth2 client-credentials grant).

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::auth::AuthError;
use crate::config::OAuthConfig;

/// Longest token endpoint error body kept for diagnostics.
const MAX_ERROR_BODY_BYTES: usize = 512;

/// Body returned by the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds. Missing or zero means "use the default".
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Something that can trade client credentials for a bearer token.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange(&self, scope: &str) -> Result<TokenResponse, AuthError>;
}

/// Client-credentials exchange over HTTP.
pub struct OAuthTokenEndpoint {
    client: reqwest::Client,
    url: String,
    client_id: String,
    client_secret: SecretString,
    grant_type: String,
}

impl OAuthTokenEndpoint {
    pub fn new(client: reqwest::Client, url: impl Into<String>, config: &OAuthConfig) -> Self {
        Self {
            client,
            url: url.into(),
            client_id: config.client_id.clone(),
            client_secret: SecretString::from(config.client_secret.clone()),
            grant_type: config.grant_type.clone(),
        }
    }

    /// Endpoint for the configured environment with its own HTTP client.
    pub fn from_config(config: &OAuthConfig, use_test_environment: bool, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        Ok(Self::new(client, config.active_token_endpoint(use_test_environment), config))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TokenEndpoint for OAuthTokenEndpoint {
    async fn exchange(&self, scope: &str) -> Result<TokenResponse, AuthError> {
        let form = [
            ("grant_type", self.grant_type.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("scope", scope),
        ];

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body: truncate_on_char_boundary(body, MAX_ERROR_BODY_BYTES),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Malformed(e.to_string()))?;

        if token.access_token.trim().is_empty() {
            return Err(AuthError::Malformed("empty access_token".into()));
        }

        Ok(token)
    }
}

fn truncate_on_char_boundary(mut body: String, max: usize) -> String {
    if body.len() > max {
        let cut = (0..=max).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
        body.truncate(cut);
    }
    body
}
