//! Credential cache with single-flight refresh.
//!
//! A scope's slot is either a ready credential or one pending exchange.
//! Callers that miss the cache while an exchange is pending await the same
//! shared future instead of starting another one. The exchange runs in its
//! own task, so a caller that gives up does not cancel it for the others.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::time::Instant;

use crate::auth::endpoint::{TokenEndpoint, TokenResponse};
use crate::auth::AuthError;
use crate::config::OAuthConfig;
use crate::observability::metrics;

/// A bearer credential. Replaced, never mutated.
pub struct Credential {
    token: SecretString,
    pub token_type: String,
    pub scope: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Served until this instant; afterwards less than the margin remains.
    fresh_until: Instant,
    hard_expiry: Instant,
}

impl Credential {
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }

    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.fresh_until
    }

    /// Time left before the upstream stops accepting the token.
    pub fn remaining(&self) -> Duration {
        self.hard_expiry.saturating_duration_since(Instant::now())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Metadata about one cached scope. Never includes the token.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub scope: String,
    pub state: &'static str,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub fresh: bool,
}

type SharedExchange = Shared<BoxFuture<'static, Result<Arc<Credential>, AuthError>>>;

enum Slot {
    Ready(Arc<Credential>),
    Pending { id: u64, exchange: SharedExchange },
}

struct Inner {
    endpoint: Arc<dyn TokenEndpoint>,
    default_scope: String,
    margin: Duration,
    default_ttl: Duration,
    slots: Mutex<HashMap<String, Slot>>,
    next_exchange_id: Mutex<u64>,
}

/// Cache of bearer credentials, one per scope.
#[derive(Clone)]
pub struct CredentialCache {
    inner: Arc<Inner>,
}

impl CredentialCache {
    pub fn new(endpoint: Arc<dyn TokenEndpoint>, config: &OAuthConfig) -> Self {
        Self::with_settings(
            endpoint,
            config.scope.clone(),
            Duration::from_secs(config.safety_margin_secs),
            Duration::from_secs(config.default_ttl_secs),
        )
    }

    pub fn with_settings(
        endpoint: Arc<dyn TokenEndpoint>,
        default_scope: impl Into<String>,
        margin: Duration,
        default_ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint,
                default_scope: default_scope.into(),
                margin,
                default_ttl,
                slots: Mutex::new(HashMap::new()),
                next_exchange_id: Mutex::new(0),
            }),
        }
    }

    /// Credential for the configured scope.
    pub async fn get_token(&self) -> Result<Arc<Credential>, AuthError> {
        let scope = self.inner.default_scope.clone();
        self.get_token_for(&scope).await
    }

    /// Credential for `scope`, exchanging at most once concurrently.
    pub async fn get_token_for(&self, scope: &str) -> Result<Arc<Credential>, AuthError> {
        let exchange = {
            let mut slots = self.inner.slots.lock();
            match slots.get(scope) {
                Some(Slot::Ready(credential)) if credential.is_fresh() => {
                    return Ok(credential.clone());
                }
                Some(Slot::Pending { exchange, .. }) => exchange.clone(),
                _ => {
                    let id = {
                        let mut next = self.inner.next_exchange_id.lock();
                        *next += 1;
                        *next
                    };
                    let exchange = Inner::start_exchange(&self.inner, scope, id);
                    slots.insert(
                        scope.to_string(),
                        Slot::Pending {
                            id,
                            exchange: exchange.clone(),
                        },
                    );
                    exchange
                }
            }
        };

        exchange.await
    }

    /// Drop the cached credential for `scope`. The next call exchanges again.
    pub fn invalidate(&self, scope: &str) -> bool {
        let removed = self.inner.slots.lock().remove(scope).is_some();
        if removed {
            tracing::info!(scope = %scope, "Credential invalidated");
        }
        removed
    }

    /// Drop the credential for the configured scope.
    pub fn invalidate_default(&self) -> bool {
        let scope = self.inner.default_scope.clone();
        self.invalidate(&scope)
    }

    pub fn status(&self) -> Vec<CredentialStatus> {
        let slots = self.inner.slots.lock();
        let mut statuses: Vec<_> = slots
            .iter()
            .map(|(scope, slot)| match slot {
                Slot::Ready(c) => CredentialStatus {
                    scope: scope.clone(),
                    state: if c.is_fresh() { "ready" } else { "stale" },
                    issued_at: Some(c.issued_at),
                    expires_at: Some(c.expires_at),
                    fresh: c.is_fresh(),
                },
                Slot::Pending { .. } => CredentialStatus {
                    scope: scope.clone(),
                    state: "refreshing",
                    issued_at: None,
                    expires_at: None,
                    fresh: false,
                },
            })
            .collect();
        statuses.sort_by(|a, b| a.scope.cmp(&b.scope));
        statuses
    }
}

impl Inner {
    fn start_exchange(inner: &Arc<Inner>, scope: &str, id: u64) -> SharedExchange {
        let task_inner = inner.clone();
        let task_scope = scope.to_string();
        let handle = tokio::spawn(async move {
            let result = task_inner.exchange(&task_scope).await;
            task_inner.settle(&task_scope, id, &result);
            result
        });

        async move { handle.await.unwrap_or(Err(AuthError::Aborted)) }
            .boxed()
            .shared()
    }

    async fn exchange(&self, scope: &str) -> Result<Arc<Credential>, AuthError> {
        tracing::debug!(scope = %scope, "Requesting credential");
        // Lifetimes count from the request, so a slow endpoint eats into them.
        let requested_at = (Instant::now(), Utc::now());
        let result = self
            .endpoint
            .exchange(scope)
            .await
            .and_then(|response| self.credential_from(scope, response, requested_at));

        match &result {
            Ok(credential) => {
                let ttl = credential.fresh_until.saturating_duration_since(Instant::now());
                tracing::info!(
                    scope = %scope,
                    ttl_secs = ttl.as_secs(),
                    expires_at = %credential.expires_at,
                    "Credential refreshed"
                );
                metrics::record_token_refresh(scope, true);
            }
            Err(e) => {
                tracing::error!(scope = %scope, error = %e, "Credential exchange failed");
                metrics::record_token_refresh(scope, false);
            }
        }
        result
    }

    fn credential_from(
        &self,
        scope: &str,
        response: TokenResponse,
        (now, issued_at): (Instant, DateTime<Utc>),
    ) -> Result<Arc<Credential>, AuthError> {
        let lifetime = response
            .expires_in
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.default_ttl);

        if lifetime <= self.margin {
            return Err(AuthError::LifetimeTooShort {
                expires_in: lifetime.as_secs(),
                margin: self.margin.as_secs(),
            });
        }

        let out_of_range = || AuthError::Malformed(format!("expires_in {}s out of range", lifetime.as_secs()));
        let hard_expiry = now.checked_add(lifetime).ok_or_else(out_of_range)?;
        let fresh_until = now.checked_add(lifetime - self.margin).ok_or_else(out_of_range)?;
        let expires_at = chrono::Duration::from_std(lifetime)
            .ok()
            .and_then(|d| issued_at.checked_add_signed(d))
            .ok_or_else(out_of_range)?;

        Ok(Arc::new(Credential {
            token: SecretString::from(response.access_token),
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: response.scope.unwrap_or_else(|| scope.to_string()),
            issued_at,
            expires_at,
            fresh_until,
            hard_expiry,
        }))
    }

    /// Store the result if this exchange still owns the slot.
    fn settle(&self, scope: &str, id: u64, result: &Result<Arc<Credential>, AuthError>) {
        let mut slots = self.slots.lock();
        let owns_slot = matches!(slots.get(scope), Some(Slot::Pending { id: pending, .. }) if *pending == id);
        if !owns_slot {
            return;
        }
        match result {
            Ok(credential) => {
                slots.insert(scope.to_string(), Slot::Ready(credential.clone()));
            }
            Err(_) => {
                slots.remove(scope);
            }
        }
    }
}
