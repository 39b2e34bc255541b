//! Durable checkpoints of the track and playlist tables
//!
//! A flush writes both tables to `.pending` siblings, publishes a commit
//! marker, then renames the pending files into place. `load` rolls a
//! committed flush forward and discards an uncommitted one, so a crash at any
//! point leaves either the previous or the new checkpoint readable, never a
//! mix of the two.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracktally_common::TallyError;
use tracktally_common::types::{
    check_consistency, PlaylistState, PlaylistStatus, PlaylistTable, Track, TrackTable,
};

use crate::error::{IngestError, Result};

/// Persists and reloads the aggregation tables
pub trait CheckpointStore: Send + Sync {
    /// Load the last complete checkpoint; empty tables on a fresh run
    fn load(&self) -> Result<(TrackTable, PlaylistTable)>;

    /// Atomically replace the checkpoint with these tables
    fn flush(&self, tracks: &TrackTable, playlists: &PlaylistTable) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct TrackRow {
    id: String,
    artist: String,
    title: String,
    url: String,
    count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PlaylistRow {
    id: String,
    status: String,
    tracks: String,
    reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CommitMarker {
    committed_at: DateTime<Utc>,
    tracks: usize,
    playlists: usize,
}

/// Two-file CSV checkpoint store
#[derive(Debug, Clone)]
pub struct CsvCheckpointStore {
    tracks_path: PathBuf,
    playlists_path: PathBuf,
}

impl CsvCheckpointStore {
    pub fn new(tracks_path: impl Into<PathBuf>, playlists_path: impl Into<PathBuf>) -> Self {
        Self {
            tracks_path: tracks_path.into(),
            playlists_path: playlists_path.into(),
        }
    }

    pub fn tracks_path(&self) -> &Path {
        &self.tracks_path
    }

    pub fn playlists_path(&self) -> &Path {
        &self.playlists_path
    }

    fn marker_path(&self) -> PathBuf {
        sibling(&self.playlists_path, ".commit")
    }

    fn pending_paths(&self) -> [(PathBuf, &Path); 2] {
        [
            (sibling(&self.tracks_path, ".pending"), &self.tracks_path),
            (sibling(&self.playlists_path, ".pending"), &self.playlists_path),
        ]
    }

    /// Finish or discard an interrupted flush
    fn recover(&self) -> Result<()> {
        let marker = self.marker_path();

        if marker.exists() {
            for (pending, target) in self.pending_paths() {
                if pending.exists() {
                    std::fs::rename(&pending, target)
                        .map_err(|e| IngestError::persistence(target, e))?;
                }
            }
            std::fs::remove_file(&marker).map_err(|e| IngestError::persistence(&marker, e))?;
            warn!(marker = %marker.display(), "Rolled forward interrupted checkpoint");
        } else {
            for (pending, _) in self.pending_paths() {
                if pending.exists() {
                    std::fs::remove_file(&pending)
                        .map_err(|e| IngestError::persistence(&pending, e))?;
                    warn!(path = %pending.display(), "Discarded uncommitted checkpoint file");
                }
            }
        }

        Ok(())
    }

    fn read_tracks(&self) -> Result<TrackTable> {
        let mut tracks = TrackTable::new();
        let Some(mut reader) = open_reader(&self.tracks_path)? else {
            return Ok(tracks);
        };

        for row in reader.deserialize::<TrackRow>() {
            let row = row.map_err(|e| IngestError::persistence(&self.tracks_path, e))?;
            tracks.insert(
                row.id,
                Track {
                    artist: row.artist,
                    title: row.title,
                    url: row.url,
                    count: row.count,
                },
            );
        }

        Ok(tracks)
    }

    fn read_playlists(&self) -> Result<PlaylistTable> {
        let mut playlists = PlaylistTable::new();
        let Some(mut reader) = open_reader(&self.playlists_path)? else {
            return Ok(playlists);
        };

        for row in reader.deserialize::<PlaylistRow>() {
            let row = row.map_err(|e| IngestError::persistence(&self.playlists_path, e))?;
            let state = row
                .status
                .parse::<PlaylistStatus>()
                .and_then(|status| PlaylistState::from_parts(&row.id, status, &row.tracks, &row.reason))
                .map_err(|e| IngestError::persistence(&self.playlists_path, e))?;
            playlists.insert(row.id, state);
        }

        Ok(playlists)
    }

    fn write_tracks(&self, path: &Path, tracks: &TrackTable) -> Result<()> {
        let mut writer = create_writer(path)?;
        for (id, track) in tracks {
            writer
                .serialize(TrackRow {
                    id: id.clone(),
                    artist: track.artist.clone(),
                    title: track.title.clone(),
                    url: track.url.clone(),
                    count: track.count,
                })
                .map_err(|e| IngestError::persistence(path, e))?;
        }
        finish_writer(path, writer)
    }

    fn write_playlists(&self, path: &Path, playlists: &PlaylistTable) -> Result<()> {
        let mut writer = create_writer(path)?;
        for (id, state) in playlists {
            writer
                .serialize(PlaylistRow {
                    id: id.clone(),
                    status: state.status().to_string(),
                    tracks: state.joined_tracks(),
                    reason: state.reason().to_string(),
                })
                .map_err(|e| IngestError::persistence(path, e))?;
        }
        finish_writer(path, writer)
    }

    /// Write both tables to their pending files without committing them
    fn stage(&self, tracks: &TrackTable, playlists: &PlaylistTable) -> Result<()> {
        for (id, state) in playlists {
            if let Some(track_id) = state.unstorable_track() {
                return Err(IngestError::persistence(
                    &self.playlists_path,
                    TallyError::invalid_record(
                        id.as_str(),
                        format!("track ID '{}' cannot be stored in the track sequence", track_id),
                    ),
                ));
            }
        }

        // A marker left by an earlier interrupted flush must not cover the files written below.
        self.recover()?;

        for path in [&self.tracks_path, &self.playlists_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| IngestError::persistence(parent, e))?;
            }
        }

        let [(tracks_pending, _), (playlists_pending, _)] = self.pending_paths();
        self.write_tracks(&tracks_pending, tracks)?;
        self.write_playlists(&playlists_pending, playlists)?;
        Ok(())
    }

    fn publish_marker(&self, marker: &CommitMarker) -> Result<()> {
        let path = self.marker_path();
        let temp = sibling(&path, ".tmp");
        let json = serde_json::to_vec_pretty(marker).map_err(|e| IngestError::persistence(&temp, e))?;

        let mut file = File::create(&temp).map_err(|e| IngestError::persistence(&temp, e))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|e| IngestError::persistence(&temp, e))?;
        std::fs::rename(&temp, &path).map_err(|e| IngestError::persistence(&path, e))?;
        sync_parent(&path);
        Ok(())
    }
}

impl CheckpointStore for CsvCheckpointStore {
    fn load(&self) -> Result<(TrackTable, PlaylistTable)> {
        self.recover()?;

        let tracks = self.read_tracks()?;
        let playlists = self.read_playlists()?;

        if let Err(err) = check_consistency(&tracks, &playlists) {
            warn!(error = %err, "Checkpoint tables disagree; continuing with stored counts");
        }

        info!(
            tracks = tracks.len(),
            playlists = playlists.len(),
            path = %self.playlists_path.display(),
            "Loaded checkpoint"
        );
        Ok((tracks, playlists))
    }

    fn flush(&self, tracks: &TrackTable, playlists: &PlaylistTable) -> Result<()> {
        self.stage(tracks, playlists)?;

        self.publish_marker(&CommitMarker {
            committed_at: Utc::now(),
            tracks: tracks.len(),
            playlists: playlists.len(),
        })?;

        // Committed: from here on a crash is rolled forward by the next load.
        self.recover()?;

        debug!(tracks = tracks.len(), playlists = playlists.len(), "Checkpoint flushed");
        Ok(())
    }
}

/// `path` with `suffix` appended to its file name
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("checkpoint"));
    name.push(suffix);
    path.with_file_name(name)
}

fn open_reader(path: &Path) -> Result<Option<csv::Reader<File>>> {
    match File::open(path) {
        Ok(file) => Ok(Some(csv::ReaderBuilder::new().has_headers(true).from_reader(file))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(IngestError::persistence(path, e)),
    }
}

fn create_writer(path: &Path) -> Result<csv::Writer<File>> {
    let file = File::create(path).map_err(|e| IngestError::persistence(path, e))?;
    Ok(csv::Writer::from_writer(file))
}

fn finish_writer(path: &Path, writer: csv::Writer<File>) -> Result<()> {
    let file = writer
        .into_inner()
        .map_err(|e| IngestError::persistence(path, e.into_error()))?;
    file.sync_all().map_err(|e| IngestError::persistence(path, e))
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
            debug!(error = %e, "Failed to sync checkpoint directory");
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CsvCheckpointStore {
        CsvCheckpointStore::new(
            dir.path().join("tracks.csv"),
            dir.path().join("playlist_details.csv"),
        )
    }

    fn tables() -> (TrackTable, PlaylistTable) {
        let mut tracks = TrackTable::new();
        tracks.insert(
            "t1".into(),
            Track { count: 2, ..Track::first_seen("Artist, The", "Title \"quoted\"", None) },
        );
        tracks.insert(
            "t2".into(),
            Track::first_seen("B", "C", Some("https://p.scdn.co/mp3-preview/x".into())),
        );

        let mut playlists = PlaylistTable::new();
        playlists.insert("p1".into(), PlaylistState::Fetched(vec!["t1".into(), "t2".into(), "t1".into()]));
        playlists.insert("p2".into(), PlaylistState::empty());
        playlists.insert("p3".into(), PlaylistState::Skipped { reason: "transport error: reset".into() });
        (tracks, playlists)
    }

    #[test]
    fn test_fresh_load_is_empty() {
        let dir = TempDir::new().unwrap();
        let (tracks, playlists) = store(&dir).load().unwrap();
        assert!(tracks.is_empty());
        assert!(playlists.is_empty());
    }

    #[test]
    fn test_flush_then_load_preserves_three_states() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let (tracks, playlists) = tables();

        store.flush(&tracks, &playlists).unwrap();
        let (loaded_tracks, loaded_playlists) = store.load().unwrap();

        assert_eq!(loaded_tracks, tracks);
        assert_eq!(loaded_playlists, playlists);
        assert!(loaded_playlists["p2"].is_fetched());
        assert!(!loaded_playlists["p3"].is_fetched());
        assert!(!store.marker_path().exists());
    }

    #[test]
    fn test_files_are_readable_csv() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let (tracks, playlists) = tables();
        store.flush(&tracks, &playlists).unwrap();

        let text = std::fs::read_to_string(store.playlists_path()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("id,status,tracks,reason"));
        assert_eq!(lines.next(), Some("p1,fetched,t1 t2 t1,"));

        let text = std::fs::read_to_string(store.tracks_path()).unwrap();
        assert!(text.starts_with("id,artist,title,url,count\n"));
    }

    #[test]
    fn test_uncommitted_flush_is_discarded() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let (tracks, playlists) = tables();
        store.flush(&tracks, &playlists).unwrap();

        // Crash after writing pending files but before the marker
        let [(tracks_pending, _), (playlists_pending, _)] = store.pending_paths();
        std::fs::write(&tracks_pending, "id,artist,title,url,count\nzz,a,b,,9\n").unwrap();
        std::fs::write(&playlists_pending, "garbage").unwrap();

        let (loaded_tracks, loaded_playlists) = store.load().unwrap();
        assert_eq!(loaded_tracks, tracks);
        assert_eq!(loaded_playlists, playlists);
        assert!(!tracks_pending.exists());
        assert!(!playlists_pending.exists());
    }

    #[test]
    fn test_committed_flush_is_rolled_forward() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let (tracks, playlists) = tables();
        store.flush(&tracks, &playlists).unwrap();

        let mut newer_playlists = playlists.clone();
        newer_playlists.insert("p4".into(), PlaylistState::Fetched(vec!["t2".into()]));
        let mut newer_tracks = tracks.clone();
        newer_tracks.get_mut("t2").unwrap().count = 2;

        // Crash after the marker and the first rename
        let [(tracks_pending, tracks_final), (playlists_pending, _)] = store.pending_paths();
        store.write_tracks(&tracks_pending, &newer_tracks).unwrap();
        store.write_playlists(&playlists_pending, &newer_playlists).unwrap();
        store
            .publish_marker(&CommitMarker { committed_at: Utc::now(), tracks: 2, playlists: 4 })
            .unwrap();
        std::fs::rename(&tracks_pending, tracks_final).unwrap();

        let (loaded_tracks, loaded_playlists) = store.load().unwrap();
        assert_eq!(loaded_tracks, newer_tracks);
        assert_eq!(loaded_playlists, newer_playlists);
        assert!(!store.marker_path().exists());
    }

    #[test]
    fn test_stale_marker_is_resolved_before_staging() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let (tracks, playlists) = tables();
        store.flush(&tracks, &playlists).unwrap();

        // Earlier flush committed its marker but crashed before renaming
        let mut committed = playlists.clone();
        committed.insert("p4".into(), PlaylistState::Skipped { reason: "timeout".into() });
        let [_, (playlists_pending, _)] = store.pending_paths();
        store.write_playlists(&playlists_pending, &committed).unwrap();
        store
            .publish_marker(&CommitMarker { committed_at: Utc::now(), tracks: 2, playlists: 4 })
            .unwrap();

        // Next flush crashes after staging, before its own marker
        let mut newer = committed.clone();
        newer.insert("p5".into(), PlaylistState::empty());
        store.stage(&tracks, &newer).unwrap();
        assert!(!store.marker_path().exists());

        let (_, loaded) = store.load().unwrap();
        assert_eq!(loaded, committed);
    }

    #[test]
    fn test_unstorable_track_id_is_rejected_and_checkpoint_kept() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let (tracks, playlists) = tables();
        store.flush(&tracks, &playlists).unwrap();

        let mut bad_tracks = tracks.clone();
        bad_tracks.insert("local track".into(), Track::first_seen("a", "b", None));
        let mut bad_playlists = playlists.clone();
        bad_playlists.insert("p9".into(), PlaylistState::Fetched(vec!["local track".into()]));

        let err = store.flush(&bad_tracks, &bad_playlists).unwrap_err();
        assert!(matches!(err, IngestError::Persistence { .. }));
        assert!(err.to_string().contains("local track"));

        let (loaded_tracks, loaded_playlists) = store.load().unwrap();
        assert_eq!(loaded_tracks, tracks);
        assert_eq!(loaded_playlists, playlists);
    }

    #[test]
    fn test_corrupt_status_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(store.playlists_path(), "id,status,tracks,reason\np1,pending,,\n").unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, IngestError::Persistence { .. }));
    }

    #[test]
    fn test_flush_into_missing_directory_creates_it() {
        let dir = TempDir::new().unwrap();
        let store = CsvCheckpointStore::new(
            dir.path().join("state/tracks.csv"),
            dir.path().join("state/playlists.csv"),
        );
        let (tracks, playlists) = tables();
        store.flush(&tracks, &playlists).unwrap();
        assert!(dir.path().join("state/tracks.csv").exists());
    }
}
