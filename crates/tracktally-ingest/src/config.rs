//! Ingestion run configuration
//!
//! Values come from defaults, then `TRACKTALLY_*` environment variables, then
//! command-line flags applied by the binary.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::egress::EgressRouter;
use crate::error::{IngestError, Result};
use crate::fetcher::FetchPolicy;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_API_BASE_URL: &str = "https://api.spotify.com/v1";
pub const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const DEFAULT_MARKET: &str = "GB";
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_CONCURRENCY: usize = 32;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_PAGE_DELAY_MS: u64 = 100;
pub const DEFAULT_MAX_AUTH_FAILURES: u32 = 10;

/// Largest page the catalog serves for playlist items
pub const MAX_PAGE_SIZE: u32 = 100;

/// Configuration for one ingestion run
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Catalog API base URL
    pub api_base_url: String,

    /// Client-credentials token endpoint
    pub token_url: String,

    pub client_id: String,

    pub client_secret: String,

    /// Market passed with every page request (None = omit)
    pub market: Option<String>,

    /// Items requested per page
    pub page_size: u32,

    /// Playlists per checkpoint batch
    pub batch_size: usize,

    /// Concurrent fetches within a batch
    pub concurrency: usize,

    /// Base name of the proxy pool; workers use "{base}-{slot}"
    pub proxy_base: Option<String>,

    /// Relay URL that proxy identities are appended to
    pub proxy_endpoint: Option<String>,

    /// Number of distinct proxy identities (defaults to concurrency)
    pub proxy_pool_size: Option<usize>,

    /// HTTP timeout in seconds
    pub timeout_secs: u64,

    /// Attempts per page request
    pub max_attempts: u32,

    /// Pause before retrying a failed page
    pub retry_delay_ms: u64,

    /// Pause between consecutive pages of one playlist
    pub page_delay_ms: u64,

    /// Consecutive token failures after which the run stops
    pub max_auth_failures: u32,

    /// Retry playlists recorded as skipped by an earlier run
    pub retry_skipped: bool,

    /// Input CSV of playlist IDs
    pub playlists_file: PathBuf,

    /// Checkpointed playlist table
    pub playlist_details_file: PathBuf,

    /// Checkpointed track table
    pub tracks_file: PathBuf,

    /// Draw progress bars
    pub show_progress: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            market: Some(DEFAULT_MARKET.to_string()),
            page_size: DEFAULT_PAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            proxy_base: None,
            proxy_endpoint: None,
            proxy_pool_size: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            page_delay_ms: DEFAULT_PAGE_DELAY_MS,
            max_auth_failures: DEFAULT_MAX_AUTH_FAILURES,
            retry_skipped: false,
            playlists_file: PathBuf::from("data/playlists.csv"),
            playlist_details_file: PathBuf::from("data/playlist_details.csv"),
            tracks_file: PathBuf::from("data/tracks.csv"),
            show_progress: true,
        }
    }
}

impl IngestConfig {
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::default()
    }

    /// Defaults overlaid with `TRACKTALLY_*` environment variables
    ///
    /// - `TRACKTALLY_API_BASE_URL`, `TRACKTALLY_TOKEN_URL`
    /// - `TRACKTALLY_CLIENT_ID`, `TRACKTALLY_CLIENT_SECRET`
    /// - `TRACKTALLY_MARKET` (empty string omits the market)
    /// - `TRACKTALLY_PAGE_SIZE`, `TRACKTALLY_BATCH_SIZE`, `TRACKTALLY_CONCURRENCY`
    /// - `TRACKTALLY_PROXY`, `TRACKTALLY_PROXY_ENDPOINT`, `TRACKTALLY_PROXY_POOL_SIZE`
    /// - `TRACKTALLY_TIMEOUT_SECS`, `TRACKTALLY_MAX_ATTEMPTS`
    /// - `TRACKTALLY_RETRY_DELAY_MS`, `TRACKTALLY_PAGE_DELAY_MS`
    /// - `TRACKTALLY_MAX_AUTH_FAILURES`, `TRACKTALLY_RETRY_SKIPPED`
    /// - `TRACKTALLY_PLAYLISTS_FILE`, `TRACKTALLY_PLAYLIST_DETAILS_FILE`, `TRACKTALLY_TRACKS_FILE`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = env_var("API_BASE_URL") {
            config.api_base_url = url;
        }
        if let Some(url) = env_var("TOKEN_URL") {
            config.token_url = url;
        }
        if let Some(id) = env_var("CLIENT_ID") {
            config.client_id = id;
        }
        if let Some(secret) = env_var("CLIENT_SECRET") {
            config.client_secret = secret;
        }
        if let Some(market) = env_var("MARKET") {
            config.market = Some(market).filter(|m| !m.is_empty());
        }
        if let Some(proxy) = env_var("PROXY") {
            config.proxy_base = Some(proxy);
        }
        if let Some(endpoint) = env_var("PROXY_ENDPOINT") {
            config.proxy_endpoint = Some(endpoint);
        }
        if let Some(path) = env_var("PLAYLISTS_FILE") {
            config.playlists_file = PathBuf::from(path);
        }
        if let Some(path) = env_var("PLAYLIST_DETAILS_FILE") {
            config.playlist_details_file = PathBuf::from(path);
        }
        if let Some(path) = env_var("TRACKS_FILE") {
            config.tracks_file = PathBuf::from(path);
        }

        config.page_size = parse_env("PAGE_SIZE")?.unwrap_or(config.page_size);
        config.batch_size = parse_env("BATCH_SIZE")?.unwrap_or(config.batch_size);
        config.concurrency = parse_env("CONCURRENCY")?.unwrap_or(config.concurrency);
        config.proxy_pool_size = parse_env("PROXY_POOL_SIZE")?.or(config.proxy_pool_size);
        config.timeout_secs = parse_env("TIMEOUT_SECS")?.unwrap_or(config.timeout_secs);
        config.max_attempts = parse_env("MAX_ATTEMPTS")?.unwrap_or(config.max_attempts);
        config.retry_delay_ms = parse_env("RETRY_DELAY_MS")?.unwrap_or(config.retry_delay_ms);
        config.page_delay_ms = parse_env("PAGE_DELAY_MS")?.unwrap_or(config.page_delay_ms);
        config.max_auth_failures =
            parse_env("MAX_AUTH_FAILURES")?.unwrap_or(config.max_auth_failures);
        config.retry_skipped = parse_env("RETRY_SKIPPED")?.unwrap_or(config.retry_skipped);

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [("API base URL", &self.api_base_url), ("token URL", &self.token_url)] {
            let parsed = reqwest::Url::parse(url)
                .map_err(|e| IngestError::config(format!("Invalid {} '{}': {}", name, url, e)))?;
            if parsed.cannot_be_a_base() {
                return Err(IngestError::config(format!("Invalid {} '{}'", name, url)));
            }
        }

        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(IngestError::config(
                "Client ID and client secret are required (TRACKTALLY_CLIENT_ID, TRACKTALLY_CLIENT_SECRET)",
            ));
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(IngestError::config(format!(
                "Page size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        if self.batch_size == 0 {
            return Err(IngestError::config("Batch size must be greater than 0"));
        }

        if self.concurrency == 0 {
            return Err(IngestError::config("Concurrency must be greater than 0"));
        }

        if self.max_attempts == 0 {
            return Err(IngestError::config("Max attempts must be greater than 0"));
        }

        if self.timeout_secs == 0 {
            return Err(IngestError::config("Timeout must be greater than 0"));
        }

        if self.proxy_base.is_some() && self.proxy_endpoint.is_none() {
            return Err(IngestError::config(
                "A proxy base name requires a proxy endpoint (TRACKTALLY_PROXY_ENDPOINT)",
            ));
        }

        if self.proxy_pool_size == Some(0) {
            return Err(IngestError::config("Proxy pool size must be greater than 0"));
        }

        for path in [&self.playlist_details_file, &self.tracks_file] {
            if path.file_name().is_none() {
                return Err(IngestError::config(format!(
                    "State file path '{}' must name a file",
                    path.display()
                )));
            }
        }

        if self.playlist_details_file == self.tracks_file {
            return Err(IngestError::config(
                "Playlist details file and tracks file must differ",
            ));
        }

        Ok(())
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            page_delay: Duration::from_millis(self.page_delay_ms),
        }
    }

    pub fn router(&self) -> EgressRouter {
        EgressRouter::new(
            self.proxy_base.clone(),
            self.proxy_pool_size.unwrap_or(self.concurrency),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("TRACKTALLY_{}", suffix)).ok()
}

fn parse_env<T>(suffix: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(suffix)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                IngestError::config(format!("TRACKTALLY_{}='{}': {}", suffix, raw, e))
            })
        })
        .transpose()
}

/// Builder for IngestConfig
#[derive(Default)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.config.token_url = url.into();
        self
    }

    pub fn credentials(mut self, client_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.config.client_id = client_id.into();
        self.config.client_secret = secret.into();
        self
    }

    pub fn market(mut self, market: Option<String>) -> Self {
        self.config.market = market;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.config.page_size = page_size;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn proxy(mut self, base: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.config.proxy_base = Some(base.into());
        self.config.proxy_endpoint = Some(endpoint.into());
        self
    }

    /// Distinct proxy identities; defaults to the concurrency
    pub fn proxy_pool_size(mut self, size: usize) -> Self {
        self.config.proxy_pool_size = Some(size);
        self
    }

    pub fn retry_delay_ms(mut self, delay: u64) -> Self {
        self.config.retry_delay_ms = delay;
        self
    }

    pub fn page_delay_ms(mut self, delay: u64) -> Self {
        self.config.page_delay_ms = delay;
        self
    }

    pub fn retry_skipped(mut self, retry: bool) -> Self {
        self.config.retry_skipped = retry;
        self
    }

    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.config.playlist_details_file = dir.join("playlist_details.csv");
        self.config.tracks_file = dir.join("tracks.csv");
        self
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.config.show_progress = show;
        self
    }

    pub fn build(self) -> IngestConfig {
        self.config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn valid() -> IngestConfigBuilder {
        IngestConfig::builder().credentials("id", "secret")
    }

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.batch_size, 10_000);
        assert_eq!(config.concurrency, 32);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.market.as_deref(), Some("GB"));
        assert!(!config.retry_skipped);
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        valid().build().validate().unwrap();
    }

    #[test]
    fn test_validate_requires_credentials() {
        let err = IngestConfig::default().validate().unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(valid().page_size(0).build().validate().is_err());
        assert!(valid().page_size(101).build().validate().is_err());
        assert!(valid().batch_size(0).build().validate().is_err());
        assert!(valid().concurrency(0).build().validate().is_err());
        assert!(valid().api_base_url("not a url").build().validate().is_err());
    }

    #[test]
    fn test_validate_proxy_needs_endpoint() {
        let mut config = valid().build();
        config.proxy_base = Some("scraper".into());
        assert!(config.validate().is_err());

        let config = valid().proxy("scraper", "http://relay.local").build();
        config.validate().unwrap();
    }

    #[test]
    fn test_router_pool_defaults_to_concurrency() {
        let config = valid().concurrency(4).proxy("scraper", "http://relay.local").build();
        let router = config.router();
        assert_eq!(router.route_for(5).unwrap().as_str(), "scraper-1");
    }

    #[test]
    fn test_router_uses_explicit_pool_size() {
        let config = valid()
            .concurrency(4)
            .proxy("scraper", "http://relay.local")
            .proxy_pool_size(2)
            .build();
        config.validate().unwrap();
        let router = config.router();
        assert_eq!(router.route_for(3).unwrap().as_str(), "scraper-1");
        assert_eq!(router.route_for(4).unwrap().as_str(), "scraper-0");

        let config = valid().proxy("scraper", "http://relay.local").proxy_pool_size(0).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_state_dir() {
        let config = valid().state_dir("/tmp/run").build();
        assert_eq!(config.tracks_file, PathBuf::from("/tmp/run/tracks.csv"));
        assert_eq!(
            config.playlist_details_file,
            PathBuf::from("/tmp/run/playlist_details.csv")
        );
    }
}
