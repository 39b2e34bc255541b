//! Catalog API wire types and transport
//!
//! The transport only moves bytes; classifying a response as a page or as one
//! of the [`FetchError`] kinds happens in [`decode_page`].

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracktally_common::types::is_storable_track_id;

use crate::credentials::Credential;
use crate::egress::ProxyIdentity;
use crate::error::FetchError;

/// One page of playlist items
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistPage {
    pub items: Vec<PlaylistItem>,

    /// URL of the next page, null on the last page
    #[serde(default)]
    pub next: Option<String>,

    /// Total number of items in the playlist
    #[serde(default)]
    pub total: Option<u64>,
}

impl PlaylistPage {
    /// Whether more items remain after `fetched` items have been collected
    pub fn has_more(&self, fetched: u64) -> bool {
        self.next.is_some() || self.total.is_some_and(|total| fetched < total)
    }
}

/// Playlist membership entry; the track is null for removed or unavailable content
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaylistItem {
    #[serde(default)]
    pub track: Option<TrackObject>,
}

impl PlaylistItem {
    /// The track if it carries a usable ID
    ///
    /// IDs containing whitespace are treated as absent since they cannot be
    /// checkpointed.
    pub fn identified_track(&self) -> Option<(&str, &TrackObject)> {
        let track = self.track.as_ref()?;
        let id = track.id.as_deref().filter(|id| is_storable_track_id(id))?;
        Some((id, track))
    }

    /// Raw track ID, present even when it is not usable
    pub fn raw_track_id(&self) -> Option<&str> {
        self.track.as_ref()?.id.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackObject {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub artists: Vec<ArtistObject>,

    #[serde(default)]
    pub preview_url: Option<String>,
}

impl TrackObject {
    pub fn first_artist(&self) -> &str {
        self.artists
            .first()
            .and_then(|a| a.name.as_deref())
            .unwrap_or_default()
    }

    pub fn title(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArtistObject {
    #[serde(default)]
    pub name: Option<String>,
}

/// Raw catalog response
///
/// `status` is None when the body came through a proxy relay, which forwards
/// only the upstream body.
#[derive(Debug, Clone)]
pub struct CatalogResponse {
    pub status: Option<u16>,
    pub body: String,
}

/// Issues authenticated GET requests against the catalog
#[async_trait]
pub trait CatalogTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        token: &Credential,
        route: Option<&ProxyIdentity>,
    ) -> Result<CatalogResponse, FetchError>;
}

/// Request body understood by the proxy relay
#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    method: &'a str,
    url: &'a str,
    headers: BTreeMap<&'static str, String>,
}

/// reqwest-backed transport, direct or through a named relay
pub struct HttpTransport {
    client: Client,
    proxy_endpoint: Option<String>,
}

impl HttpTransport {
    pub fn new(timeout: Duration, proxy_endpoint: Option<String>) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tracktally-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            proxy_endpoint: proxy_endpoint.map(|e| e.trim_end_matches('/').to_string()),
        })
    }

    async fn get_direct(&self, url: &str, token: &Credential) -> Result<CatalogResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(token.as_str())
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(FetchError::transport)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(FetchError::transport)?;
        Ok(CatalogResponse { status: Some(status), body })
    }

    async fn get_relayed(
        &self,
        url: &str,
        token: &Credential,
        identity: &ProxyIdentity,
    ) -> Result<CatalogResponse, FetchError> {
        let endpoint = self.proxy_endpoint.as_deref().ok_or_else(|| {
            FetchError::Transport(format!("no proxy endpoint configured for route {}", identity))
        })?;

        let mut headers = BTreeMap::new();
        headers.insert("Authorization", format!("Bearer {}", token.as_str()));
        headers.insert("Content-Type", "application/json".to_string());
        let request = RelayRequest { method: "GET", url, headers };

        let response = self
            .client
            .post(format!("{}/{}", endpoint, identity))
            .json(&request)
            .send()
            .await
            .map_err(FetchError::transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Transport(format!(
                "proxy relay {} returned HTTP {}",
                identity, status
            )));
        }

        let body = response.text().await.map_err(FetchError::transport)?;
        Ok(CatalogResponse { status: None, body })
    }
}

#[async_trait]
impl CatalogTransport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        token: &Credential,
        route: Option<&ProxyIdentity>,
    ) -> Result<CatalogResponse, FetchError> {
        match route {
            None => self.get_direct(url, token).await,
            Some(identity) => self.get_relayed(url, token, identity).await,
        }
    }
}

/// Classify a catalog response as a page or a failure
///
/// An `{"error": ...}` payload is always a failure, never an empty page.
pub fn decode_page(response: CatalogResponse) -> Result<PlaylistPage, FetchError> {
    let status = response.status.filter(|s| !(200..300).contains(s));

    let value: serde_json::Value = match serde_json::from_str(&response.body) {
        Ok(value) => value,
        Err(err) => {
            return Err(match status {
                Some(401) => FetchError::Auth("HTTP 401".to_string()),
                Some(code) => FetchError::Api(format!("HTTP {}", code)),
                None => FetchError::decode(err),
            });
        },
    };

    if let Some(error) = value.get("error") {
        return Err(classify_error_object(error, status));
    }

    match status {
        Some(401) => return Err(FetchError::Auth("HTTP 401".to_string())),
        Some(code) => return Err(FetchError::Api(format!("HTTP {}", code))),
        None => {},
    }

    serde_json::from_value(value).map_err(FetchError::decode)
}

fn classify_error_object(error: &serde_json::Value, http_status: Option<u16>) -> FetchError {
    let status = error
        .get("status")
        .and_then(|s| s.as_u64())
        .map(|s| s as u16)
        .or(http_status);
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .or_else(|| error.as_str().map(str::to_string))
        .unwrap_or_else(|| error.to_string());

    match status {
        Some(401) => FetchError::Auth(message),
        Some(code) => FetchError::Api(format!("{} (status {})", message, code)),
        None => FetchError::Api(message),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn response(status: Option<u16>, body: &str) -> CatalogResponse {
        CatalogResponse { status, body: body.to_string() }
    }

    #[test]
    fn test_decodes_page_with_null_tracks() {
        let body = r#"{
            "items": [
                {"track": {"id": "t1", "name": "Song", "artists": [{"name": "A"}, {"name": "B"}], "preview_url": null}},
                {"track": null},
                {"track": {"id": null, "name": "Local file"}}
            ],
            "next": null,
            "total": 3
        }"#;

        let page = decode_page(response(Some(200), body)).unwrap();
        assert_eq!(page.items.len(), 3);

        let (id, track) = page.items[0].identified_track().unwrap();
        assert_eq!(id, "t1");
        assert_eq!(track.first_artist(), "A");
        assert_eq!(track.title(), "Song");
        assert!(page.items[1].identified_track().is_none());
        assert!(page.items[2].identified_track().is_none());

        let local = PlaylistItem {
            track: Some(TrackObject { id: Some("local track".into()), ..TrackObject::default() }),
        };
        assert!(local.identified_track().is_none());
        assert_eq!(local.raw_track_id(), Some("local track"));
        assert!(!page.has_more(3));
    }

    #[test]
    fn test_has_more_from_cursor_or_total() {
        let page = decode_page(response(Some(200), r#"{"items": [], "next": "x"}"#)).unwrap();
        assert!(page.has_more(0));

        let page = decode_page(response(None, r#"{"items": [], "total": 107}"#)).unwrap();
        assert!(page.has_more(100));
        assert!(!page.has_more(107));
    }

    #[test]
    fn test_error_object_is_failure_not_empty_page() {
        let err = decode_page(response(
            Some(200),
            r#"{"error": {"status": 401, "message": "The access token expired"}}"#,
        ))
        .unwrap_err();
        assert_eq!(err, FetchError::Auth("The access token expired".to_string()));

        let err = decode_page(response(
            None,
            r#"{"error": {"status": 429, "message": "API rate limit exceeded"}}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, FetchError::Api(_)));
    }

    #[test]
    fn test_http_status_classification() {
        assert!(matches!(
            decode_page(response(Some(401), "Unauthorized")).unwrap_err(),
            FetchError::Auth(_)
        ));
        assert!(matches!(
            decode_page(response(Some(502), "<html>bad gateway</html>")).unwrap_err(),
            FetchError::Api(_)
        ));
        assert!(matches!(
            decode_page(response(Some(404), r#"{"message": "nope"}"#)).unwrap_err(),
            FetchError::Api(_)
        ));
    }

    #[test]
    fn test_malformed_body_is_decode_error() {
        assert!(matches!(
            decode_page(response(Some(200), "not json")).unwrap_err(),
            FetchError::Decode(_)
        ));
        assert!(matches!(
            decode_page(response(Some(200), r#"{"next": null}"#)).unwrap_err(),
            FetchError::Decode(_)
        ));
    }
}
