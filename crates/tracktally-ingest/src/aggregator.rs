//! Merges fetched playlists into the running track and playlist tables
//!
//! Merging is commutative across playlists, so results can be applied in
//! whatever order the workers complete.

use tracing::{debug, warn};
use tracktally_common::types::{PlaylistState, PlaylistTable, Track, TrackTable};

use crate::catalog::PlaylistItem;
use crate::fetcher::FetchOutcome;

/// Per-merge counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Tracks seen for the first time
    pub new_tracks: usize,
    /// Track references appended to the playlist
    pub appended: usize,
    /// Items dropped for lacking a track ID
    pub filtered: usize,
}

/// Owner of the in-memory tables; only the scheduler's task mutates it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregator {
    tracks: TrackTable,
    playlists: PlaylistTable,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from checkpointed tables
    pub fn from_tables(tracks: TrackTable, playlists: PlaylistTable) -> Self {
        Self { tracks, playlists }
    }

    pub fn tracks(&self) -> &TrackTable {
        &self.tracks
    }

    pub fn playlists(&self) -> &PlaylistTable {
        &self.playlists
    }

    pub fn into_tables(self) -> (TrackTable, PlaylistTable) {
        (self.tracks, self.playlists)
    }

    /// Apply a fetch outcome
    pub fn apply(&mut self, playlist_id: &str, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Fetched(items) => {
                self.merge(playlist_id, items);
            },
            FetchOutcome::Skipped { reason } => {
                self.record_skip(playlist_id, reason);
            },
            // Left absent so the next run fetches it
            FetchOutcome::Deferred { .. } => {},
        }
    }

    /// Merge a fully fetched playlist
    ///
    /// The playlist is marked fetched even when no item carries a track ID.
    /// Repeated tracks count once per occurrence; first-seen metadata wins.
    pub fn merge(&mut self, playlist_id: &str, items: &[PlaylistItem]) -> MergeStats {
        let mut stats = MergeStats::default();

        let state = self
            .playlists
            .entry(playlist_id.to_string())
            .or_insert_with(PlaylistState::empty);
        if !state.is_fetched() {
            *state = PlaylistState::empty();
        }
        let PlaylistState::Fetched(sequence) = state else {
            return stats;
        };

        for item in items {
            let Some((track_id, track)) = item.identified_track() else {
                if let Some(raw) = item.raw_track_id() {
                    warn!(playlist_id, track_id = raw, "Dropping track whose ID contains whitespace");
                }
                stats.filtered += 1;
                continue;
            };

            match self.tracks.get_mut(track_id) {
                Some(existing) => existing.count += 1,
                None => {
                    self.tracks.insert(
                        track_id.to_string(),
                        Track::first_seen(
                            track.first_artist(),
                            track.title(),
                            track.preview_url.clone(),
                        ),
                    );
                    stats.new_tracks += 1;
                },
            }

            sequence.push(track_id.to_string());
            stats.appended += 1;
        }

        debug!(
            playlist_id,
            new_tracks = stats.new_tracks,
            appended = stats.appended,
            filtered = stats.filtered,
            "Merged playlist"
        );
        stats
    }

    /// Record an abandoned playlist; returns false if it is already fetched
    pub fn record_skip(&mut self, playlist_id: &str, reason: &str) -> bool {
        match self.playlists.get(playlist_id) {
            Some(state) if state.is_fetched() => false,
            _ => {
                self.playlists.insert(
                    playlist_id.to_string(),
                    PlaylistState::Skipped { reason: reason.to_string() },
                );
                true
            },
        }
    }
}
