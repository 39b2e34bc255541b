//! tracktally-ingest - playlist track ingestion tool

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracktally_common::logging::{init_logging, LogConfig, LogLevel};
use tracktally_common::types::{check_consistency, PlaylistTable};
use tracktally_ingest::{
    read_playlist_ids, scheduler, Aggregator, CheckpointStore, ClientCredentialsSource,
    CredentialManager, CsvCheckpointStore, HttpTransport, IngestConfig, PlaylistFetcher,
    Scheduler, SchedulerSettings, StopReason,
};

#[derive(Parser, Debug)]
#[command(name = "tracktally-ingest")]
#[command(author, version, about = "Playlist track ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch pending playlists and checkpoint after every batch
    Run(RunArgs),

    /// Report checkpoint contents and remaining work without fetching
    Status(FileArgs),
}

#[derive(Args, Debug)]
struct FileArgs {
    /// Input CSV of playlist IDs (first column)
    #[arg(long, env = "TRACKTALLY_PLAYLISTS_FILE")]
    playlists_file: Option<PathBuf>,

    /// Checkpointed playlist table
    #[arg(long, env = "TRACKTALLY_PLAYLIST_DETAILS_FILE")]
    playlist_details_file: Option<PathBuf>,

    /// Checkpointed track table
    #[arg(long, env = "TRACKTALLY_TRACKS_FILE")]
    tracks_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    files: FileArgs,

    /// Playlists per checkpoint batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Concurrent playlist fetches
    #[arg(long)]
    max_workers: Option<usize>,

    /// Items requested per page
    #[arg(long)]
    page_size: Option<u32>,

    /// Market code sent with each request; empty to omit
    #[arg(long)]
    market: Option<String>,

    /// Proxy pool base name; worker slots use "<proxy>-<slot>"
    #[arg(long)]
    proxy: Option<String>,

    /// Proxy relay URL
    #[arg(long)]
    proxy_endpoint: Option<String>,

    /// Number of distinct proxy identities (defaults to --max-workers)
    #[arg(long)]
    proxy_pool_size: Option<usize>,

    /// Retry playlists recorded as skipped by earlier runs
    #[arg(long)]
    retry_skipped: bool,

    /// Disable progress bars
    #[arg(long)]
    no_progress: bool,
}

impl FileArgs {
    fn apply(&self, config: &mut IngestConfig) {
        if let Some(path) = &self.playlists_file {
            config.playlists_file = path.clone();
        }
        if let Some(path) = &self.playlist_details_file {
            config.playlist_details_file = path.clone();
        }
        if let Some(path) = &self.tracks_file {
            config.tracks_file = path.clone();
        }
    }
}

impl RunArgs {
    fn apply(&self, config: &mut IngestConfig) {
        self.files.apply(config);
        if let Some(size) = self.batch_size {
            config.batch_size = size;
        }
        if let Some(workers) = self.max_workers {
            config.concurrency = workers;
        }
        if let Some(size) = self.page_size {
            config.page_size = size;
        }
        if let Some(market) = &self.market {
            config.market = Some(market.clone()).filter(|m| !m.is_empty());
        }
        if let Some(proxy) = &self.proxy {
            config.proxy_base = Some(proxy.clone());
        }
        if let Some(endpoint) = &self.proxy_endpoint {
            config.proxy_endpoint = Some(endpoint.clone());
        }
        if let Some(size) = self.proxy_pool_size {
            config.proxy_pool_size = Some(size);
        }
        config.retry_skipped |= self.retry_skipped;
        config.show_progress &= !self.no_progress;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the verbose flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("tracktally-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = IngestConfig::from_env()?;
    match cli.command {
        Command::Run(args) => {
            args.apply(&mut config);
            run(config).await
        },
        Command::Status(files) => {
            files.apply(&mut config);
            status(&config)
        },
    }
}

async fn run(config: IngestConfig) -> Result<()> {
    config.validate()?;

    let playlist_ids = read_playlist_ids(&config.playlists_file)?;

    let store = CsvCheckpointStore::new(&config.tracks_file, &config.playlist_details_file);
    let (tracks, playlists) = store.load()?;
    let mut aggregator = Aggregator::from_tables(tracks, playlists);

    let source = ClientCredentialsSource::new(
        &config.token_url,
        &config.client_id,
        &config.client_secret,
        config.timeout(),
    )
    .context("Failed to build token client")?;
    let credentials = Arc::new(CredentialManager::new(Arc::new(source), config.max_auth_failures));

    let transport = HttpTransport::new(config.timeout(), config.proxy_endpoint.clone())
        .context("Failed to build catalog client")?;
    let fetcher = Arc::new(PlaylistFetcher::new(
        Arc::new(transport),
        credentials,
        &config.api_base_url,
        config.market.clone(),
        config.fetch_policy(),
    ));

    let router = config.router();
    if !router.is_direct() {
        info!(
            proxy = config.proxy_base.as_deref().unwrap_or_default(),
            endpoint = config.proxy_endpoint.as_deref().unwrap_or_default(),
            "Routing requests through proxy pool"
        );
    }

    let scheduler = Scheduler::new(fetcher, router, SchedulerSettings::from(&config));
    let cancel = scheduler.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current batch is checkpointed");
            cancel.cancel();
        }
    });

    let summary = scheduler
        .run(&playlist_ids, &mut aggregator, &store)
        .await?
        .finish()?;

    match summary.stopped {
        Some(StopReason::Cancelled) => {
            info!(
                batches = summary.batches_flushed,
                "Run interrupted; rerun the same command to resume"
            );
        },
        _ => {
            info!(
                run_id = %summary.run_id,
                fetched = summary.fetched,
                skipped = summary.skipped.len(),
                tracks = summary.tracks_known,
                "Ingestion complete"
            );
        },
    }

    Ok(())
}

fn status(config: &IngestConfig) -> Result<()> {
    let store = CsvCheckpointStore::new(&config.tracks_file, &config.playlist_details_file);
    let (tracks, playlists) = store.load()?;

    let (fetched, skipped) = count_states(&playlists);
    let occurrences: u64 = tracks.values().map(|t| t.count).sum();

    println!("Playlist details: {}", store.playlists_path().display());
    println!("Tracks:           {}", store.tracks_path().display());
    println!("Playlists fetched: {}", fetched);
    println!("Playlists skipped: {}", skipped);
    println!("Distinct tracks:   {}", tracks.len());
    println!("Track occurrences: {}", occurrences);

    match check_consistency(&tracks, &playlists) {
        Ok(()) => println!("Consistency:       ok"),
        Err(err) => println!("Consistency:       FAILED ({})", err),
    }

    if config.playlists_file.exists() {
        let ids = read_playlist_ids(&config.playlists_file)?;
        let pending = scheduler::plan(&ids, &playlists, false).len();
        let retryable = scheduler::plan(&ids, &playlists, true).len() - pending;
        println!("Pending playlists: {} (+{} skipped, retried with --retry-skipped)", pending, retryable);
    }

    Ok(())
}

fn count_states(playlists: &PlaylistTable) -> (usize, usize) {
    let fetched = playlists.values().filter(|state| state.is_fetched()).count();
    (fetched, playlists.len() - fetched)
}
