//! tracktally ingestion library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Fetches the full item list of every playlist named in an input file,
//! aggregates per-track occurrence counts and metadata, and checkpoints both
//! tables after every batch so an interrupted run resumes where it stopped.
//!
//! # Components
//!
//! - [`credentials`]: cached client-credentials token with on-demand refresh
//! - [`egress`]: assigns worker slots to named proxy identities
//! - [`catalog`]: wire types and the HTTP transport
//! - [`fetcher`]: paginated playlist fetch with per-page retry
//! - [`scheduler`]: batches, bounded concurrency and checkpoint cadence
//! - [`aggregator`]: merges fetched playlists into the tables
//! - [`checkpoint`]: crash-safe CSV persistence of the tables
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tracktally_ingest::{
//!     read_playlist_ids, Aggregator, CheckpointStore, ClientCredentialsSource,
//!     CredentialManager, CsvCheckpointStore, HttpTransport, IngestConfig, PlaylistFetcher,
//!     Scheduler, SchedulerSettings,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     config.validate()?;
//!
//!     let source = ClientCredentialsSource::new(
//!         &config.token_url,
//!         &config.client_id,
//!         &config.client_secret,
//!         config.timeout(),
//!     )?;
//!     let credentials = Arc::new(CredentialManager::new(Arc::new(source), config.max_auth_failures));
//!     let transport = Arc::new(HttpTransport::new(config.timeout(), config.proxy_endpoint.clone())?);
//!     let fetcher = Arc::new(PlaylistFetcher::new(
//!         transport,
//!         credentials,
//!         &config.api_base_url,
//!         config.market.clone(),
//!         config.fetch_policy(),
//!     ));
//!
//!     let store = CsvCheckpointStore::new(&config.tracks_file, &config.playlist_details_file);
//!     let (tracks, playlists) = store.load()?;
//!     let mut aggregator = Aggregator::from_tables(tracks, playlists);
//!
//!     let scheduler = Scheduler::new(fetcher, config.router(), SchedulerSettings::from(&config));
//!     let ids = read_playlist_ids(&config.playlists_file)?;
//!     scheduler.run(&ids, &mut aggregator, &store).await?.into_result()?;
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod credentials;
pub mod egress;
pub mod error;
pub mod fetcher;
pub mod input;
pub mod scheduler;

pub use aggregator::{Aggregator, MergeStats};
pub use catalog::{CatalogTransport, HttpTransport, PlaylistItem};
pub use checkpoint::{CheckpointStore, CsvCheckpointStore};
pub use config::IngestConfig;
pub use credentials::{ClientCredentialsSource, Credential, CredentialManager, TokenSource};
pub use egress::{EgressRouter, ProxyIdentity};
pub use error::{FetchError, IngestError, Result, TokenError};
pub use fetcher::{FetchOutcome, FetchPolicy, PlaylistFetcher};
pub use input::read_playlist_ids;
pub use scheduler::{RunSummary, Scheduler, SchedulerSettings, StopReason};
