//! Track and playlist tables shared by the ingestion pipeline
//!
//! Both tables are ordered maps so a checkpoint written from the same logical
//! state is byte-for-byte identical no matter in which order playlists were
//! merged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, TallyError};

/// Global track table keyed by upstream track ID
pub type TrackTable = BTreeMap<String, Track>;

/// Playlist table keyed by upstream playlist ID
///
/// A playlist absent from the table has not been attempted yet.
pub type PlaylistTable = BTreeMap<String, PlaylistState>;

/// Whether `id` can be stored in a whitespace-separated track sequence
///
/// Catalog track IDs are base-62 strings; an empty ID or one containing
/// whitespace would not survive a checkpoint round trip.
pub fn is_storable_track_id(id: &str) -> bool {
    !id.is_empty() && !id.chars().any(char::is_whitespace)
}

/// A deduplicated track with its occurrence count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// First listed artist name (empty if the catalog listed none)
    pub artist: String,

    /// Track title
    pub title: String,

    /// Preview audio URL, empty when the catalog has none
    pub url: String,

    /// Number of (playlist, position) pairs referencing this track
    pub count: u64,
}

impl Track {
    /// A track observed for the first time
    pub fn first_seen(
        artist: impl Into<String>,
        title: impl Into<String>,
        url: Option<String>,
    ) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
            url: url.unwrap_or_default(),
            count: 1,
        }
    }
}

/// Persisted status of an attempted playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistStatus {
    /// Fetched completely; the track sequence may be empty
    Fetched,
    /// Abandoned after exhausting retries
    Skipped,
}

impl PlaylistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaylistStatus::Fetched => "fetched",
            PlaylistStatus::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for PlaylistStatus {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fetched" => Ok(PlaylistStatus::Fetched),
            "skipped" => Ok(PlaylistStatus::Skipped),
            other => Err(TallyError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for PlaylistStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a playlist that has been attempted at least once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaylistState {
    /// Track IDs in API-return order, duplicates preserved
    Fetched(Vec<String>),
    /// Fetch abandoned; never to be read as an empty playlist
    Skipped { reason: String },
}

impl PlaylistState {
    /// A fetched playlist with no tracks yet
    pub fn empty() -> Self {
        PlaylistState::Fetched(Vec::new())
    }

    pub fn status(&self) -> PlaylistStatus {
        match self {
            PlaylistState::Fetched(_) => PlaylistStatus::Fetched,
            PlaylistState::Skipped { .. } => PlaylistStatus::Skipped,
        }
    }

    pub fn is_fetched(&self) -> bool {
        matches!(self, PlaylistState::Fetched(_))
    }

    /// Track IDs of a fetched playlist; empty for a skipped one
    pub fn track_ids(&self) -> &[String] {
        match self {
            PlaylistState::Fetched(ids) => ids,
            PlaylistState::Skipped { .. } => &[],
        }
    }

    /// Rebuild a state from its persisted columns
    ///
    /// `tracks` is the space-separated track ID sequence. A skipped playlist
    /// must not carry tracks.
    pub fn from_parts(id: &str, status: PlaylistStatus, tracks: &str, reason: &str) -> Result<Self> {
        match status {
            PlaylistStatus::Fetched => Ok(PlaylistState::Fetched(
                tracks.split_whitespace().map(str::to_string).collect(),
            )),
            PlaylistStatus::Skipped if !tracks.trim().is_empty() => Err(
                TallyError::invalid_record(id, "skipped playlist carries a track sequence"),
            ),
            PlaylistStatus::Skipped => Ok(PlaylistState::Skipped {
                reason: reason.to_string(),
            }),
        }
    }

    /// Space-separated track sequence for persistence
    pub fn joined_tracks(&self) -> String {
        self.track_ids().join(" ")
    }

    /// First track ID that [`joined_tracks`](Self::joined_tracks) cannot encode losslessly
    pub fn unstorable_track(&self) -> Option<&str> {
        self.track_ids()
            .iter()
            .map(String::as_str)
            .find(|id| !is_storable_track_id(id))
    }

    /// Skip reason, empty for a fetched playlist
    pub fn reason(&self) -> &str {
        match self {
            PlaylistState::Fetched(_) => "",
            PlaylistState::Skipped { reason } => reason,
        }
    }
}

/// Count track references across all fetched playlists
pub fn occurrence_counts(playlists: &PlaylistTable) -> BTreeMap<&str, u64> {
    let mut counts = BTreeMap::new();
    for id in playlists.values().flat_map(|state| state.track_ids()) {
        *counts.entry(id.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Verify that every track count equals its number of playlist references
pub fn check_consistency(tracks: &TrackTable, playlists: &PlaylistTable) -> Result<()> {
    let counts = occurrence_counts(playlists);

    if counts.len() != tracks.len() {
        return Err(TallyError::Inconsistent(format!(
            "{} tracks in table, {} referenced by playlists",
            tracks.len(),
            counts.len()
        )));
    }

    for (id, track) in tracks {
        let referenced = counts.get(id.as_str()).copied().unwrap_or(0);
        if referenced != track.count {
            return Err(TallyError::Inconsistent(format!(
                "track {} has count {} but {} references",
                id, track.count, referenced
            )));
        }
    }

    Ok(())
}
