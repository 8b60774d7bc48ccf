//! End-to-end research runs: plan, discover, collect evidence, report.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use shared_types::{is_sentinel, QueryId, QueryRecord};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::clients::{
    verify_connection, CompletionProvider, DataForSeoSearch, HttpPageFetcher, OpenRouterClient,
    PageFetcher, SearchProvider,
};
use crate::config::OverwatchConfig;
use crate::error::{Error, Result};
use crate::pipeline::{Pipeline, PipelineConfig, PipelineOutcome, PipelineProgress};
use crate::planning::{ChecklistPlanner, DomainClassifier};
use crate::report::{write_report, ReportSynthesizer};
use crate::store::EvidenceStore;
use crate::summarize::Summarizer;

/// The three external collaborators a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub llm: Arc<dyn CompletionProvider>,
    pub search: Arc<dyn SearchProvider>,
    pub fetcher: Arc<dyn PageFetcher>,
}

impl Collaborators {
    /// Real HTTP clients built from `config`. Requires LLM and search credentials.
    pub fn from_config(config: &OverwatchConfig) -> Result<Self> {
        config.require_llm_key()?;
        config.require_search_credentials()?;
        Ok(Self {
            llm: Arc::new(OpenRouterClient::new(&config.llm)?),
            search: Arc::new(DataForSeoSearch::new(&config.search)?),
            fetcher: Arc::new(HttpPageFetcher::new(&config.pipeline)?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CollectOutcome {
    pub query_id: QueryId,
    /// Domain persona, when classification succeeded
    pub domain: Option<String>,
    pub checklist: String,
    pub discovered: usize,
    pub pipeline: PipelineOutcome,
}

#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub query: QueryRecord,
    pub sources: usize,
    /// Sources whose summary holds findings rather than a placeholder
    pub informative: usize,
    pub report: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub collect: CollectOutcome,
    /// None when the run was cancelled before the report step
    pub report: Option<ReportOutcome>,
}

pub struct Research {
    config: OverwatchConfig,
    store: EvidenceStore,
    collaborators: Collaborators,
    verify_llm: bool,
    progress_tx: Option<mpsc::UnboundedSender<PipelineProgress>>,
    cancel: CancellationToken,
}

impl Research {
    pub fn new(config: OverwatchConfig, store: EvidenceStore, collaborators: Collaborators) -> Self {
        Self {
            config,
            store,
            collaborators,
            verify_llm: true,
            progress_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn skip_verification(mut self, skip: bool) -> Self {
        self.verify_llm = !skip;
        self
    }

    pub fn with_progress(mut self, progress_tx: mpsc::UnboundedSender<PipelineProgress>) -> Self {
        self.progress_tx = Some(progress_tx);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Collect evidence for `query`, then write the report.
    pub async fn run(&self, query: &str) -> Result<RunOutcome> {
        let collect = self.collect(query).await?;
        if collect.pipeline.cancelled {
            tracing::warn!(query_id = %collect.query_id, "Run cancelled; skipping report");
            return Ok(RunOutcome {
                collect,
                report: None,
            });
        }
        let report = self.report().await?;
        Ok(RunOutcome {
            collect,
            report: Some(report),
        })
    }

    /// Plan, reset the store, discover URLs and run the pipeline.
    pub async fn collect(&self, query: &str) -> Result<CollectOutcome> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::EmptyQuery);
        }
        let llm = self.collaborators.llm.clone();

        if self.verify_llm {
            verify_connection(llm.as_ref()).await.inspect_err(|e| {
                tracing::error!(error = %e, "LLM connection check failed");
            })?;
        }

        let domain = match DomainClassifier::new(llm.clone()).classify(query).await {
            Ok(domain) => {
                tracing::info!(domain = %domain, "Query domain classified");
                Some(domain)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Domain classification failed; continuing");
                None
            }
        };

        let checklist = ChecklistPlanner::new(llm.clone()).checklist(query).await?;

        self.store.reset().await?;
        let query_id = self.store.put_query(query, &checklist).await?;

        let max_urls = self.config.search.max_urls;
        let urls = self.collaborators.search.search(query, max_urls).await?;
        let discovered = urls.len();
        tracing::info!(query_id = %query_id, discovered, "URLs discovered");

        let summarizer = Arc::new(Summarizer::new(
            llm,
            self.config.pipeline.max_content_chars,
        ));
        let mut pipeline = Pipeline::new(
            self.collaborators.fetcher.clone(),
            summarizer,
            self.store.clone(),
            PipelineConfig::from(&self.config.pipeline),
        )
        .with_cancellation(self.cancel.clone());
        if let Some(tx) = &self.progress_tx {
            pipeline = pipeline.with_progress(tx.clone());
        }

        let outcome = pipeline.run(query_id, &checklist, urls).await?;
        Ok(CollectOutcome {
            query_id,
            domain,
            checklist,
            discovered,
            pipeline: outcome,
        })
    }

    /// Synthesize and write the report for the latest query in the store.
    pub async fn report(&self) -> Result<ReportOutcome> {
        generate_report(
            &self.store,
            self.collaborators.llm.clone(),
            &self.config,
        )
        .await
    }
}

/// Report for the latest stored query. Needs only the LLM collaborator.
pub async fn generate_report(
    store: &EvidenceStore,
    llm: Arc<dyn CompletionProvider>,
    config: &OverwatchConfig,
) -> Result<ReportOutcome> {
    let query = store.latest_query().await?;
    let evidence = store.evidence_for(query.id).await?;

    let synthesizer = ReportSynthesizer::new(llm, config.llm.report_max_tokens);
    let report = synthesizer
        .synthesize(&query.query, &query.checklist, &evidence, Utc::now())
        .await?;
    let path = write_report(&config.storage.data_dir, &query.query, &report).await?;

    Ok(ReportOutcome {
        sources: evidence.len(),
        informative: evidence.iter().filter(|row| !is_sentinel(&row.summary)).count(),
        query,
        report,
        path,
    })
}
