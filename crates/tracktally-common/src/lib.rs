//! tracktally common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, error handling and logging for the tracktally workspace.
//!
//! # Overview
//!
//! - **Types**: the track table and playlist table that the ingestion
//!   pipeline aggregates into and checkpoints
//! - **Error Handling**: error and result types for shared-type validation
//! - **Logging**: `tracing` subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use tracktally_common::types::{PlaylistState, PlaylistTable, TrackTable};
//!
//! let tracks = TrackTable::new();
//! let mut playlists = PlaylistTable::new();
//! playlists.insert("37i9dQZF1DXcBWIGoYBM5M".to_string(), PlaylistState::empty());
//! tracktally_common::types::check_consistency(&tracks, &playlists)?;
//! # Ok::<(), tracktally_common::TallyError>(())
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, TallyError};
