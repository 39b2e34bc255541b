//! Batch scheduler
//!
//! Splits the pending playlists into batches, fans each batch out over a
//! bounded pool of fetch tasks, feeds completed results to the aggregator one
//! at a time, and flushes a checkpoint once every task of the batch is done.
//! A crash therefore loses at most the batch in flight.

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracktally_common::types::PlaylistTable;
use uuid::Uuid;

use crate::aggregator::Aggregator;
use crate::checkpoint::CheckpointStore;
use crate::config::IngestConfig;
use crate::credentials::CredentialManager;
use crate::egress::EgressRouter;
use crate::error::{IngestError, Result};
use crate::fetcher::{FetchOutcome, PlaylistFetcher};

/// Batch and concurrency settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub batch_size: usize,
    pub concurrency: usize,
    pub page_size: u32,
    pub retry_skipped: bool,
    pub show_progress: bool,
}

impl From<&IngestConfig> for SchedulerSettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            concurrency: config.concurrency,
            page_size: config.page_size,
            retry_skipped: config.retry_skipped,
            show_progress: config.show_progress,
        }
    }
}

/// Why a run ended before processing every pending playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Stop requested through the cancellation token
    Cancelled,
    /// Token endpoint rejected the credentials or kept failing
    CredentialsExhausted,
}

/// A playlist abandoned during this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPlaylist {
    pub playlist_id: String,
    pub reason: String,
}

/// Outcome of a scheduler run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Playlists pending at the start of the run
    pub pending: usize,
    pub batches_flushed: usize,
    pub fetched: usize,
    pub skipped: Vec<SkippedPlaylist>,
    /// Playlists left unattempted because no credential was available
    pub deferred: Vec<String>,
    pub tracks_known: usize,
    pub stopped: Option<StopReason>,
}

impl RunSummary {
    fn new(pending: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pending,
            batches_flushed: 0,
            fetched: 0,
            skipped: Vec::new(),
            deferred: Vec::new(),
            tracks_known: 0,
            stopped: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.stopped.is_none()
    }

    /// Log every playlist left unfetched, then convert with [`Self::into_result`]
    pub fn finish(self) -> Result<Self> {
        for skipped in &self.skipped {
            warn!(playlist_id = %skipped.playlist_id, reason = %skipped.reason, "Playlist skipped");
        }
        if !self.deferred.is_empty() {
            warn!(
                deferred = self.deferred.len(),
                first = %self.deferred[0],
                "Playlists left pending for lack of credentials; they are fetched on the next run"
            );
        }
        self.into_result()
    }

    /// Turn a credentials stop into an error
    pub fn into_result(self) -> Result<Self> {
        match self.stopped {
            Some(StopReason::CredentialsExhausted) => Err(IngestError::CredentialsExhausted {
                batches_flushed: self.batches_flushed,
            }),
            _ => Ok(self),
        }
    }
}

/// Playlists still to fetch, deduplicated in input order
///
/// Fetched playlists (including genuinely empty ones) are never refetched.
/// Skipped ones are retried only when `retry_skipped` is set.
pub fn plan(playlist_ids: &[String], playlists: &PlaylistTable, retry_skipped: bool) -> Vec<String> {
    let mut seen = HashSet::new();
    playlist_ids
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .filter(|id| match playlists.get(id.as_str()) {
            None => true,
            Some(state) if state.is_fetched() => false,
            Some(_) => retry_skipped,
        })
        .cloned()
        .collect()
}

/// Runs fetch batches and checkpoints after each one
pub struct Scheduler {
    fetcher: Arc<PlaylistFetcher>,
    router: EgressRouter,
    settings: SchedulerSettings,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(fetcher: Arc<PlaylistFetcher>, router: EgressRouter, settings: SchedulerSettings) -> Self {
        Self {
            fetcher,
            router,
            settings: SchedulerSettings {
                batch_size: settings.batch_size.max(1),
                concurrency: settings.concurrency.max(1),
                ..settings
            },
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the run at the next batch boundary
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn credentials(&self) -> &CredentialManager {
        self.fetcher.credentials()
    }

    /// Process every pending playlist, flushing `store` after each batch
    ///
    /// A persistence failure aborts immediately; the previous checkpoint stays
    /// intact on disk.
    pub async fn run(
        &self,
        playlist_ids: &[String],
        aggregator: &mut Aggregator,
        store: &dyn CheckpointStore,
    ) -> Result<RunSummary> {
        let pending = plan(playlist_ids, aggregator.playlists(), self.settings.retry_skipped);
        let mut summary = RunSummary::new(pending.len());
        let batch_count = pending.len().div_ceil(self.settings.batch_size);

        info!(
            run_id = %summary.run_id,
            input = playlist_ids.len(),
            already_attempted = aggregator.playlists().len(),
            pending = pending.len(),
            batches = batch_count,
            batch_size = self.settings.batch_size,
            concurrency = self.settings.concurrency,
            "Starting ingestion run"
        );

        for (index, batch) in pending.chunks(self.settings.batch_size).enumerate() {
            if self.cancel.is_cancelled() {
                warn!(batch = index + 1, "Stop requested; ending run at batch boundary");
                summary.stopped = Some(StopReason::Cancelled);
                break;
            }

            let started = Instant::now();
            info!(
                batch = index + 1,
                of = batch_count,
                offset = index * self.settings.batch_size,
                playlists = batch.len(),
                "Starting batch"
            );

            let (fetched, skipped, deferred) = self.run_batch(batch, aggregator, &mut summary).await;

            if let Err(err) = store.flush(aggregator.tracks(), aggregator.playlists()) {
                error!(batch = index + 1, error = %err, "Checkpoint flush failed; aborting run");
                return Err(err);
            }
            summary.batches_flushed += 1;

            info!(
                batch = index + 1,
                fetched,
                skipped,
                deferred,
                tracks = aggregator.tracks().len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Batch checkpointed"
            );

            if self.credentials().is_exhausted() {
                error!(batch = index + 1, "Credentials exhausted; ending run after checkpoint");
                summary.stopped = Some(StopReason::CredentialsExhausted);
                break;
            }
        }

        summary.tracks_known = aggregator.tracks().len();
        info!(
            run_id = %summary.run_id,
            batches = summary.batches_flushed,
            fetched = summary.fetched,
            skipped = summary.skipped.len(),
            deferred = summary.deferred.len(),
            tracks = summary.tracks_known,
            complete = summary.is_complete(),
            "Ingestion run finished"
        );
        Ok(summary)
    }

    /// Fetch one batch, merging results as they complete
    async fn run_batch(
        &self,
        batch: &[String],
        aggregator: &mut Aggregator,
        summary: &mut RunSummary,
    ) -> (usize, usize, usize) {
        let progress = self.progress_bar(batch.len() as u64);
        let concurrency = self.settings.concurrency;
        let page_size = self.settings.page_size;
        let (mut fetched, mut skipped, mut deferred) = (0, 0, 0);

        let mut results = stream::iter(batch.iter().enumerate())
            .map(|(position, playlist_id)| {
                let fetcher = Arc::clone(&self.fetcher);
                let route = self.router.route_for(position % concurrency);
                let playlist_id = playlist_id.clone();

                async move {
                    let task = tokio::spawn({
                        let playlist_id = playlist_id.clone();
                        async move { fetcher.fetch(&playlist_id, page_size, route.as_ref()).await }
                    });
                    let outcome = task.await.unwrap_or_else(|e| FetchOutcome::Skipped {
                        reason: format!("fetch task failed: {}", e),
                    });
                    (playlist_id, outcome)
                }
            })
            .buffer_unordered(concurrency);

        while let Some((playlist_id, outcome)) = results.next().await {
            match &outcome {
                FetchOutcome::Fetched(_) => fetched += 1,
                FetchOutcome::Skipped { reason } => {
                    skipped += 1;
                    summary.skipped.push(SkippedPlaylist {
                        playlist_id: playlist_id.clone(),
                        reason: reason.clone(),
                    });
                },
                FetchOutcome::Deferred { .. } => {
                    deferred += 1;
                    summary.deferred.push(playlist_id.clone());
                },
            }
            aggregator.apply(&playlist_id, &outcome);
            progress.inc(1);
        }

        progress.finish_and_clear();
        summary.fetched += fetched;
        (fetched, skipped, deferred)
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.settings.show_progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(len);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_message("Getting playlist items");
        bar
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tracktally_common::types::PlaylistState;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plan_dedups_in_input_order() {
        let planned = plan(&ids(&["b", "a", "b", "c", "a"]), &PlaylistTable::new(), false);
        assert_eq!(planned, ids(&["b", "a", "c"]));
    }

    #[test]
    fn test_plan_three_states() {
        let mut table = PlaylistTable::new();
        table.insert("full".into(), PlaylistState::Fetched(vec!["t".into()]));
        table.insert("empty".into(), PlaylistState::empty());
        table.insert("failed".into(), PlaylistState::Skipped { reason: "x".into() });
        let input = ids(&["full", "empty", "failed", "new"]);

        assert_eq!(plan(&input, &table, false), ids(&["new"]));
        assert_eq!(plan(&input, &table, true), ids(&["failed", "new"]));
    }

    #[test]
    fn test_credentials_stop_becomes_error() {
        let mut summary = RunSummary::new(3);
        summary.batches_flushed = 1;
        summary.stopped = Some(StopReason::CredentialsExhausted);
        assert!(matches!(
            summary.into_result(),
            Err(IngestError::CredentialsExhausted { batches_flushed: 1 })
        ));

        let mut summary = RunSummary::new(3);
        summary.stopped = Some(StopReason::Cancelled);
        assert!(summary.into_result().is_ok());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_finish_reports_skipped_before_credentials_error() {
        let mut summary = RunSummary::new(3);
        summary.batches_flushed = 1;
        summary.skipped.push(SkippedPlaylist {
            playlist_id: "gone".into(),
            reason: "Resource not found".into(),
        });
        summary.deferred.push("later".into());
        summary.stopped = Some(StopReason::CredentialsExhausted);

        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .finish();
        let result = tracing::subscriber::with_default(subscriber, || summary.finish());

        assert!(matches!(result, Err(IngestError::CredentialsExhausted { batches_flushed: 1 })));
        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Playlist skipped"));
        assert!(output.contains("gone"));
        assert!(output.contains("Resource not found"));
        assert!(output.contains("deferred=1"));
    }
}
