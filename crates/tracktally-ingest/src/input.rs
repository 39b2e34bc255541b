//! Playlist ID input file
//!
//! A CSV file with a header row whose first column holds playlist IDs. Other
//! columns are ignored, as are rows with a blank ID.

use std::path::Path;
use tracing::{debug, info};

use crate::error::{IngestError, Result};

/// Read playlist IDs in file order
///
/// Duplicates are kept here; the scheduler deduplicates when planning.
pub fn read_playlist_ids(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| IngestError::input(path, e))?;

    let mut ids = Vec::new();
    let mut blank = 0;
    for record in reader.records() {
        let record = record.map_err(|e| IngestError::input(path, e))?;
        match record.get(0).filter(|id| !id.is_empty()) {
            Some(id) => ids.push(id.to_string()),
            None => blank += 1,
        }
    }

    if blank > 0 {
        debug!(path = %path.display(), blank, "Ignored rows without a playlist ID");
    }
    info!(path = %path.display(), playlists = ids.len(), "Loaded playlist IDs");
    Ok(ids)
}
