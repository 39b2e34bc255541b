//! Paginated playlist fetcher
//!
//! Each page request gets a bounded number of attempts. Between attempts the
//! fetcher waits and forces a credential refresh, since an expired token is
//! the most common transient failure. If any page exhausts its attempts the
//! whole playlist is abandoned: a partial item list would silently corrupt the
//! occurrence counts.

use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::catalog::{decode_page, CatalogTransport, PlaylistItem, PlaylistPage};
use crate::credentials::CredentialManager;
use crate::egress::ProxyIdentity;
use crate::error::FetchError;

/// Retry and pacing policy for page requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Attempts per page, including the first
    pub max_attempts: u32,

    /// Pause before each retry
    pub retry_delay: Duration,

    /// Pause between consecutive pages
    pub page_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            retry_delay: Duration::from_secs(1),
            page_delay: Duration::from_millis(100),
        }
    }
}

/// Result of fetching one playlist
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Every page fetched; items in request order
    Fetched(Vec<PlaylistItem>),
    /// Abandoned after a page exhausted its attempts
    Skipped { reason: String },
    /// Not attempted because no credential could be obtained; stays pending
    Deferred { reason: String },
}

/// Fetches complete playlists page by page
pub struct PlaylistFetcher {
    transport: Arc<dyn CatalogTransport>,
    credentials: Arc<CredentialManager>,
    api_base_url: String,
    market: Option<String>,
    policy: FetchPolicy,
}

impl PlaylistFetcher {
    pub fn new(
        transport: Arc<dyn CatalogTransport>,
        credentials: Arc<CredentialManager>,
        api_base_url: impl Into<String>,
        market: Option<String>,
        policy: FetchPolicy,
    ) -> Self {
        Self {
            transport,
            credentials,
            api_base_url: api_base_url.into(),
            market,
            policy,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    /// Fetch every item of a playlist
    #[instrument(skip(self, route), fields(route = route.map(|r| r.as_str()).unwrap_or("direct")))]
    pub async fn fetch(
        &self,
        playlist_id: &str,
        page_size: u32,
        route: Option<&ProxyIdentity>,
    ) -> FetchOutcome {
        let page_size = page_size.max(1);
        let mut items = Vec::new();
        let mut offset: u64 = 0;
        let mut pages = 0;

        loop {
            let page = match self.fetch_page(playlist_id, page_size, offset, route).await {
                Ok(page) => page,
                Err(err @ FetchError::AuthUnavailable(_)) => {
                    warn!(playlist_id, offset, error = %err, "Deferring playlist until credentials recover");
                    return FetchOutcome::Deferred { reason: err.to_string() };
                },
                Err(err) => {
                    warn!(playlist_id, offset, error = %err, "Skipping playlist");
                    return FetchOutcome::Skipped { reason: err.to_string() };
                },
            };
            pages += 1;

            let returned = page.items.len();
            let more = page.has_more((items.len() + returned) as u64);
            items.extend(page.items);

            if returned == 0 || !more {
                break;
            }

            offset += u64::from(page_size);
            if !self.policy.page_delay.is_zero() {
                tokio::time::sleep(self.policy.page_delay).await;
            }
        }

        debug!(playlist_id, pages, items = items.len(), "Fetched playlist");
        FetchOutcome::Fetched(items)
    }

    /// One page, retried with a forced credential refresh between attempts
    async fn fetch_page(
        &self,
        playlist_id: &str,
        page_size: u32,
        offset: u64,
        route: Option<&ProxyIdentity>,
    ) -> Result<PlaylistPage, FetchError> {
        let url = self.page_url(playlist_id, page_size, offset)?;
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt_page(url.as_str(), route).await {
                Ok(page) => return Ok(page),
                Err(err) if attempt < max_attempts => {
                    warn!(
                        playlist_id,
                        offset,
                        attempt,
                        max_attempts,
                        error = %err,
                        "Page request failed, refreshing credentials before retry"
                    );
                    tokio::time::sleep(self.policy.retry_delay).await;
                    // A failed refresh leaves no cached token, so the next attempt retries the
                    // token endpoint in acquire() and reports AuthUnavailable if it is still down.
                    if let Err(refresh_err) = self.credentials.refresh().await {
                        debug!(playlist_id, error = %refresh_err, "Credential refresh failed");
                    }
                    attempt += 1;
                },
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt_page(
        &self,
        url: &str,
        route: Option<&ProxyIdentity>,
    ) -> Result<PlaylistPage, FetchError> {
        let token = self.credentials.acquire().await?;
        let response = self.transport.get(url, &token, route).await?;
        decode_page(response)
    }

    fn page_url(&self, playlist_id: &str, page_size: u32, offset: u64) -> Result<Url, FetchError> {
        let mut url = Url::parse(&self.api_base_url)
            .map_err(|e| FetchError::Transport(format!("invalid API base URL: {}", e)))?;

        url.path_segments_mut()
            .map_err(|_| FetchError::Transport("API base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["playlists", playlist_id, "tracks"]);

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("limit", &page_size.to_string())
                .append_pair("offset", &offset.to_string());
            if let Some(market) = &self.market {
                query.append_pair("market", market);
            }
        }

        Ok(url)
    }
}
