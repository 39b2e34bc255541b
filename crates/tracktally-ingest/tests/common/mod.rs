//! Shared helpers for ingestion integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracktally_ingest::{
    ClientCredentialsSource, CredentialManager, EgressRouter, FetchPolicy, HttpTransport,
    PlaylistFetcher, Scheduler, SchedulerSettings,
};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const TOKEN: &str = "test-token";

/// Policy without pauses so retries run instantly
pub fn fast_policy() -> FetchPolicy {
    FetchPolicy {
        max_attempts: 2,
        retry_delay: Duration::ZERO,
        page_delay: Duration::ZERO,
    }
}

pub fn track_json(id: &str) -> Value {
    json!({
        "track": {
            "id": id,
            "name": format!("Title {}", id),
            "artists": [{"name": format!("Artist {}", id)}, {"name": "Featuring"}],
            "preview_url": format!("https://p.example/{}", id)
        }
    })
}

/// One page body: `ids` as items plus the cursor and total
pub fn page_json(ids: &[String], next: Option<&str>, total: usize) -> Value {
    json!({
        "items": ids.iter().map(|id| track_json(id)).collect::<Vec<_>>(),
        "next": next,
        "total": total
    })
}

pub fn strings(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

/// Token endpoint that always issues [`TOKEN`]
pub async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": TOKEN,
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

/// Single-page playlist
pub async fn mount_playlist(server: &MockServer, playlist_id: &str, track_ids: &[&str]) {
    let ids = strings(track_ids);
    Mock::given(method("GET"))
        .and(path(format!("/v1/playlists/{}/tracks", playlist_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json(&ids, None, ids.len())))
        .mount(server)
        .await;
}

/// Playlist that answers with an error payload
pub async fn mount_missing_playlist(server: &MockServer, playlist_id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/playlists/{}/tracks", playlist_id)))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"status": 404, "message": "Resource not found"}
        })))
        .mount(server)
        .await;
}

pub fn credentials(server: &MockServer) -> Arc<CredentialManager> {
    let source = ClientCredentialsSource::new(
        format!("{}/api/token", server.uri()),
        "client-id",
        "client-secret",
        Duration::from_secs(5),
    )
    .unwrap();
    Arc::new(CredentialManager::new(Arc::new(source), 3))
}

pub fn fetcher(server: &MockServer, proxy_endpoint: Option<String>) -> Arc<PlaylistFetcher> {
    let transport = HttpTransport::new(Duration::from_secs(5), proxy_endpoint).unwrap();
    Arc::new(PlaylistFetcher::new(
        Arc::new(transport),
        credentials(server),
        format!("{}/v1", server.uri()),
        None,
        fast_policy(),
    ))
}

pub fn settings(batch_size: usize, concurrency: usize) -> SchedulerSettings {
    SchedulerSettings {
        batch_size,
        concurrency,
        page_size: 50,
        retry_skipped: false,
        show_progress: false,
    }
}

pub fn scheduler(server: &MockServer, batch_size: usize) -> Scheduler {
    Scheduler::new(fetcher(server, None), EgressRouter::direct(), settings(batch_size, 2))
}
