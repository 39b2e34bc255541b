//! Bearer token management
//!
//! One [`CredentialManager`] is shared by every fetch worker through an `Arc`.
//! Any worker may force a refresh; concurrent refreshes race harmlessly and the
//! last token written wins.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{FetchError, TokenError};

/// Opaque bearer token
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Produces a fresh bearer token on every call
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<Credential, TokenError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// OAuth client-credentials token source
pub struct ClientCredentialsSource {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl ClientCredentialsSource {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tracktally-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsSource {
    async fn fetch_token(&self) -> Result<Credential, TokenError> {
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| TokenError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() && status.as_u16() != 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenError::Rejected(format!("HTTP {}: {}", status, body.trim())));
        }
        if !status.is_success() {
            return Err(TokenError::Unreachable(format!("HTTP {}", status)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| TokenError::Unreachable(format!("invalid token response: {}", e)))?;

        Ok(Credential::new(token.access_token))
    }
}

/// Caches the current token and replaces it on demand
pub struct CredentialManager {
    source: Arc<dyn TokenSource>,
    cached: RwLock<Option<Credential>>,
    consecutive_failures: AtomicU32,
    rejected: AtomicBool,
    max_failures: u32,
}

impl CredentialManager {
    /// `max_failures` consecutive token failures exhaust the manager; 0 disables the limit
    pub fn new(source: Arc<dyn TokenSource>, max_failures: u32) -> Self {
        Self {
            source,
            cached: RwLock::new(None),
            consecutive_failures: AtomicU32::new(0),
            rejected: AtomicBool::new(false),
            max_failures,
        }
    }

    /// Return the cached token, fetching one if none is held
    pub async fn acquire(&self) -> Result<Credential, FetchError> {
        if let Some(token) = self.cached.read().await.as_ref() {
            return Ok(token.clone());
        }

        // Hold the write lock so a cold start issues one token request, not one per worker.
        let mut cached = self.cached.write().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let token = self.fetch().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Discard the cached token and fetch a new one
    pub async fn refresh(&self) -> Result<Credential, FetchError> {
        self.cached.write().await.take();
        let token = self.fetch().await?;
        *self.cached.write().await = Some(token.clone());
        debug!("Access token refreshed");
        Ok(token)
    }

    /// True once the token endpoint has proven permanently unusable
    pub fn is_exhausted(&self) -> bool {
        self.rejected.load(Ordering::SeqCst)
            || (self.max_failures > 0
                && self.consecutive_failures.load(Ordering::SeqCst) >= self.max_failures)
    }

    async fn fetch(&self) -> Result<Credential, FetchError> {
        match self.source.fetch_token().await {
            Ok(token) => {
                if self.consecutive_failures.swap(0, Ordering::SeqCst) > 0 {
                    info!("Token endpoint recovered");
                }
                Ok(token)
            },
            Err(err) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if matches!(err, TokenError::Rejected(_)) {
                    self.rejected.store(true, Ordering::SeqCst);
                }
                warn!(error = %err, consecutive_failures = failures, "Failed to obtain access token");
                Err(FetchError::AuthUnavailable(err.to_string()))
            },
        }
    }
}
