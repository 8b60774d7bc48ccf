//! Scrape-then-summarize coordinator.
//!
//! Every discovered URL gets a fetch task gated by the fetch semaphore. As
//! fetches complete, in completion order, pages with content get a dependent
//! summarize task gated by the summarize semaphore; everything else is
//! recorded as a "no content" row. Each summary is persisted as soon as its
//! task completes. One `select!` loop drains both task sets, so progress is
//! reported after every completion and evidence never waits for the slowest
//! fetch.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use shared_types::{processing_error, DiscoveredUrl, NewEvidence, QueryId, NO_CONTENT_SENTINEL};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clients::fetch::{FetchError, FetchOutcome, PageFetcher};
use crate::config::PipelineSettings;
use crate::store::{EvidenceStore, StoreError};
use crate::summarize::Summarizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub fetch_concurrency: usize,
    pub summarize_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: 5,
            summarize_concurrency: 5,
        }
    }
}

impl From<&PipelineSettings> for PipelineConfig {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            fetch_concurrency: settings.fetch_concurrency.max(1),
            summarize_concurrency: settings.summarize_concurrency.max(1),
        }
    }
}

/// Snapshot of the two progress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineProgress {
    pub total: usize,
    pub fetched: usize,
    /// Pages handed to the summarizer
    pub found: usize,
    pub summarized: usize,
}

impl std::fmt::Display for PipelineProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Fetched {}/{} | Summarized {}/{}",
            self.fetched, self.total, self.summarized, self.found
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub run_id: Uuid,
    pub query_id: QueryId,
    pub total: usize,
    /// Fetch tasks that ran to completion, successful or not
    pub fetched: usize,
    pub found: usize,
    pub summarized: usize,
    /// Fetches that failed or produced no text
    pub failed: usize,
    /// Fetches never started because the run was cancelled
    pub skipped: usize,
    pub rows_written: usize,
    pub cancelled: bool,
}

impl PipelineOutcome {
    fn new(run_id: Uuid, query_id: QueryId, total: usize) -> Self {
        Self {
            run_id,
            query_id,
            total,
            fetched: 0,
            found: 0,
            summarized: 0,
            failed: 0,
            skipped: 0,
            rows_written: 0,
            cancelled: false,
        }
    }

    pub fn progress(&self) -> PipelineProgress {
        PipelineProgress {
            total: self.total,
            fetched: self.fetched,
            found: self.found,
            summarized: self.summarized,
        }
    }
}

pub struct Pipeline {
    fetcher: Arc<dyn PageFetcher>,
    summarizer: Arc<Summarizer>,
    store: EvidenceStore,
    config: PipelineConfig,
    progress_tx: Option<mpsc::UnboundedSender<PipelineProgress>>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        summarizer: Arc<Summarizer>,
        store: EvidenceStore,
        config: PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            summarizer,
            store,
            config,
            progress_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress_tx: mpsc::UnboundedSender<PipelineProgress>) -> Self {
        self.progress_tx = Some(progress_tx);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetch, summarize and persist evidence for every URL in `urls`.
    ///
    /// Per-URL failures are absorbed. Only a store failure ends the run
    /// early, and then tasks still in flight are aborted.
    pub async fn run(
        &self,
        query_id: QueryId,
        checklist: &str,
        urls: Vec<DiscoveredUrl>,
    ) -> Result<PipelineOutcome, StoreError> {
        let run_id = Uuid::new_v4();
        let mut outcome = PipelineOutcome::new(run_id, query_id, urls.len());
        let checklist: Arc<str> = Arc::from(checklist);

        tracing::info!(
            run_id = %run_id,
            query_id = %query_id,
            total = outcome.total,
            fetch_concurrency = self.config.fetch_concurrency,
            summarize_concurrency = self.config.summarize_concurrency,
            "Pipeline started"
        );
        self.report_progress(&outcome);

        let fetch_permits = Arc::new(Semaphore::new(self.config.fetch_concurrency));
        let summarize_permits = Arc::new(Semaphore::new(self.config.summarize_concurrency));
        let mut fetches: JoinSet<(DiscoveredUrl, FetchOutcome)> = JoinSet::new();
        let mut summaries: JoinSet<(DiscoveredUrl, String)> = JoinSet::new();

        for discovered in urls {
            fetches.spawn(fetch_task(
                self.fetcher.clone(),
                fetch_permits.clone(),
                self.cancel.clone(),
                discovered,
            ));
        }

        loop {
            tokio::select! {
                Some(joined) = fetches.join_next(), if !fetches.is_empty() => {
                    let (discovered, fetched) = match joined {
                        Ok(result) => result,
                        Err(e) => {
                            tracing::error!(run_id = %run_id, error = %e, "Fetch task lost");
                            outcome.failed += 1;
                            continue;
                        }
                    };

                    if matches!(fetched, FetchOutcome::Failed(FetchError::Cancelled)) {
                        outcome.skipped += 1;
                        continue;
                    }
                    outcome.fetched += 1;

                    match fetched.content() {
                        Some(page) if !self.cancel.is_cancelled() => {
                            outcome.found += 1;
                            summaries.spawn(summarize_task(
                                self.summarizer.clone(),
                                summarize_permits.clone(),
                                checklist.clone(),
                                discovered,
                                page.text.clone(),
                            ));
                        }
                        Some(_) => {
                            tracing::debug!(url = %discovered.url, "Run cancelled, not summarizing");
                        }
                        None => {
                            if let FetchOutcome::Failed(err) = &fetched {
                                tracing::warn!(run_id = %run_id, url = %discovered.url, error = %err, "No content fetched");
                            } else {
                                tracing::warn!(run_id = %run_id, url = %discovered.url, "Page has no main content");
                            }
                            outcome.failed += 1;
                            self.persist(query_id, &NewEvidence::for_url(&discovered, NO_CONTENT_SENTINEL))
                                .await?;
                            outcome.rows_written += 1;
                        }
                    }
                    self.report_progress(&outcome);
                }
                Some(joined) = summaries.join_next(), if !summaries.is_empty() => {
                    let (discovered, summary) = match joined {
                        Ok(result) => result,
                        Err(e) => {
                            tracing::error!(run_id = %run_id, error = %e, "Summarize task lost");
                            continue;
                        }
                    };

                    self.persist(query_id, &NewEvidence::for_url(&discovered, summary))
                        .await?;
                    outcome.rows_written += 1;
                    outcome.summarized += 1;
                    tracing::debug!(url = %discovered.url, "Evidence recorded");
                    self.report_progress(&outcome);
                }
                else => break,
            }
        }

        outcome.cancelled = self.cancel.is_cancelled();
        tracing::info!(
            run_id = %run_id,
            query_id = %query_id,
            fetched = outcome.fetched,
            found = outcome.found,
            summarized = outcome.summarized,
            failed = outcome.failed,
            skipped = outcome.skipped,
            cancelled = outcome.cancelled,
            "Pipeline finished"
        );
        Ok(outcome)
    }

    async fn persist(&self, query_id: QueryId, evidence: &NewEvidence) -> Result<(), StoreError> {
        self.store
            .put_evidence(query_id, evidence)
            .await
            .inspect_err(|e| {
                tracing::error!(url = %evidence.url, error = %e, "Failed to persist evidence");
            })
    }

    fn report_progress(&self, outcome: &PipelineOutcome) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(outcome.progress());
        }
    }
}

async fn fetch_task(
    fetcher: Arc<dyn PageFetcher>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    discovered: DiscoveredUrl,
) -> (DiscoveredUrl, FetchOutcome) {
    let permit = tokio::select! {
        _ = cancel.cancelled() => None,
        permit = permits.acquire_owned() => permit.ok(),
    };
    let Some(_permit) = permit else {
        return (discovered, FetchOutcome::Failed(FetchError::Cancelled));
    };
    if cancel.is_cancelled() {
        return (discovered, FetchOutcome::Failed(FetchError::Cancelled));
    }

    let outcome = AssertUnwindSafe(fetcher.fetch(&discovered.url))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            tracing::error!(url = %discovered.url, panic = %message, "Fetch task panicked");
            FetchOutcome::Failed(FetchError::Panicked(message))
        });
    (discovered, outcome)
}

async fn summarize_task(
    summarizer: Arc<Summarizer>,
    permits: Arc<Semaphore>,
    checklist: Arc<str>,
    discovered: DiscoveredUrl,
    text: String,
) -> (DiscoveredUrl, String) {
    // The semaphore is never closed.
    let _permit = permits.acquire_owned().await.ok();

    let summary = AssertUnwindSafe(summarizer.summarize(&text, &checklist))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            tracing::error!(url = %discovered.url, panic = %message, "Summarize task panicked");
            processing_error(format!("summarizer panicked: {message}"))
        });
    (discovered, summary)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
