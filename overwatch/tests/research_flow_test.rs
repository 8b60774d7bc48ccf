//! End-to-end collect/report flow through fake collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use overwatch::clients::{
    CompletionProvider, CompletionRequest, FetchOutcome, LlmError, PageFetcher, SearchError,
    SearchProvider,
};
use overwatch::config::OverwatchConfig;
use overwatch::report::{ReportError, ReportSynthesizer};
use overwatch::research::{generate_report, Collaborators, Research};
use overwatch::store::{EvidenceStore, StoreError};
use overwatch::Error;
use shared_types::{DiscoveredUrl, EvidenceRow, PageContent, QueryId};

// ============================================================================
// Fakes
// ============================================================================

const CHECKLIST: &str = "1. What is X?\n2. When did X happen?";

/// Routes each prompt by its recognizable opening and records every request.
#[derive(Default)]
struct RoutingLlm {
    requests: Mutex<Vec<CompletionRequest>>,
    report_reply: Option<String>,
    fail_domain: bool,
}

impl RoutingLlm {
    fn prompts_containing(&self, needle: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.messages.iter().any(|m| m.content.contains(needle)))
            .count()
    }
}

#[async_trait]
impl CompletionProvider for RoutingLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let first = request.messages[0].content.as_str();
        let last = request.messages[request.messages.len() - 1].content.as_str();

        if last.contains("respond with 'OK'") {
            return Ok("OK".to_string());
        }
        if last.contains("domain expertise") {
            if self.fail_domain {
                return Err(LlmError::Request("connection reset".to_string()));
            }
            return Ok("Science: Physicist".to_string());
        }
        if first.contains("fact verifier") {
            return Ok(CHECKLIST.to_string());
        }
        if last.contains("Extract key points") {
            return Ok("X is 5.".to_string());
        }
        if first.contains("database query tool") {
            if let Some(reply) = &self.report_reply {
                return Ok(reply.clone());
            }
            let answer_two = if last.contains("happened on") {
                "2. X happened on Monday."
            } else {
                "2. No information available"
            };
            return Ok(format!("1. X is 5.\n{answer_two}\n\nSources:\n- [1]"));
        }
        Err(LlmError::Parse(format!("unexpected prompt: {first}")))
    }
}

struct FixedSearch {
    urls: Vec<String>,
    calls: AtomicUsize,
}

#[async_trait]
impl SearchProvider for FixedSearch {
    async fn search(
        &self,
        _keyword: &str,
        max_urls: usize,
    ) -> Result<Vec<DiscoveredUrl>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .urls
            .iter()
            .take(max_urls)
            .map(|u| DiscoveredUrl::new(u.clone(), "fixture.test"))
            .collect())
    }
}

struct StaticFetcher;

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        if url.contains("empty") {
            FetchOutcome::Page(PageContent::new("Empty", ""))
        } else {
            FetchOutcome::Page(PageContent::new("Page", format!("X is 5 according to {url}")))
        }
    }
}

fn collaborators(llm: Arc<RoutingLlm>, urls: &[&str]) -> (Collaborators, Arc<FixedSearch>) {
    let search = Arc::new(FixedSearch {
        urls: urls.iter().map(|u| u.to_string()).collect(),
        calls: AtomicUsize::new(0),
    });
    let collaborators = Collaborators {
        llm,
        search: search.clone(),
        fetcher: Arc::new(StaticFetcher),
    };
    (collaborators, search)
}

fn config_in(dir: &tempfile::TempDir) -> OverwatchConfig {
    let mut config = OverwatchConfig::default();
    config.storage.data_dir = dir.path().join("data");
    config.search.max_urls = 3;
    config
}

fn row(url: &str, summary: &str) -> EvidenceRow {
    EvidenceRow {
        query_id: QueryId(1),
        url: url.to_string(),
        summary: summary.to_string(),
        collected_at: Utc::now(),
        source: "fixture.test".to_string(),
    }
}

// ============================================================================
// Full runs
// ============================================================================

#[tokio::test]
async fn test_run_collects_evidence_and_writes_report() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let store = EvidenceStore::open(&config.database_path()).await.unwrap();
    let llm = Arc::new(RoutingLlm::default());
    let (collaborators, search) = collaborators(
        llm.clone(),
        &[
            "https://a.test/x",
            "https://b.test/empty",
            "https://c.test/x",
            "https://d.test/x",
        ],
    );

    let research = Research::new(config, store.clone(), collaborators);
    let run = research.run("Bivol's last fight?!").await.unwrap();

    assert_eq!(run.collect.domain.as_deref(), Some("Science: Physicist"));
    assert_eq!(run.collect.checklist, CHECKLIST);
    assert_eq!(run.collect.discovered, 3);
    assert_eq!(run.collect.pipeline.fetched, 3);
    assert_eq!(run.collect.pipeline.summarized, 2);
    assert_eq!(search.calls.load(Ordering::SeqCst), 1);

    let report = run.report.expect("report written");
    assert_eq!(report.query.query, "Bivol's last fight?!");
    assert_eq!(report.sources, 3);
    assert_eq!(report.informative, 2);
    assert!(report.report.starts_with("1. X is 5."));
    assert!(report.path.ends_with("data/Bivol_s_last_fight_final_summary.txt"));
    let on_disk = std::fs::read_to_string(&report.path).unwrap();
    assert_eq!(on_disk, report.report);

    assert_eq!(llm.prompts_containing("respond with 'OK'"), 1);
    assert_eq!(llm.prompts_containing("Extract key points"), 2);
    store.close().await;
}

#[tokio::test]
async fn test_domain_failure_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let store = EvidenceStore::in_memory().await.unwrap();
    let llm = Arc::new(RoutingLlm {
        fail_domain: true,
        ..Default::default()
    });
    let (collaborators, _) = collaborators(llm.clone(), &["https://a.test/x"]);

    let collect = Research::new(config, store, collaborators)
        .skip_verification(true)
        .collect("what is x")
        .await
        .unwrap();

    assert!(collect.domain.is_none());
    assert_eq!(collect.pipeline.summarized, 1);
    assert_eq!(llm.prompts_containing("respond with 'OK'"), 0);
}

#[tokio::test]
async fn test_second_collect_replaces_first() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let store = EvidenceStore::in_memory().await.unwrap();
    let (first, _) = collaborators(Arc::new(RoutingLlm::default()), &["https://old.test/x"]);
    let (second, _) = collaborators(Arc::new(RoutingLlm::default()), &["https://new.test/x"]);

    Research::new(config.clone(), store.clone(), first)
        .collect("first query")
        .await
        .unwrap();
    Research::new(config, store.clone(), second)
        .collect("second query")
        .await
        .unwrap();

    let latest = store.latest_query().await.unwrap();
    assert_eq!(latest.query, "second query");
    let rows = store.all_evidence().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].url, "https://new.test/x");
}

#[tokio::test]
async fn test_blank_query_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let store = EvidenceStore::in_memory().await.unwrap();
    let (collaborators, search) = collaborators(Arc::new(RoutingLlm::default()), &[]);
    let err = Research::new(config_in(&dir), store, collaborators)
        .collect("   ")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyQuery));
    assert_eq!(search.calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Report generation
// ============================================================================

#[tokio::test]
async fn test_report_without_query_or_evidence_refuses() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let store = EvidenceStore::in_memory().await.unwrap();
    let llm = Arc::new(RoutingLlm::default());

    let err = generate_report(&store, llm.clone(), &config).await.unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::NoQuery)));
    assert!(err.is_not_found());

    store.put_query("q", CHECKLIST).await.unwrap();
    let err = generate_report(&store, llm.clone(), &config).await.unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::NoEvidence(_))));

    assert!(llm.requests.lock().unwrap().is_empty());
    assert!(!config.storage.data_dir.exists());
}

#[tokio::test]
async fn test_synthesize_empty_evidence_makes_no_llm_call() {
    let llm = Arc::new(RoutingLlm::default());
    let synthesizer = ReportSynthesizer::new(llm.clone(), 4000);
    let err = synthesizer
        .synthesize("q", CHECKLIST, &[], Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err, ReportError::NoEvidence);
    assert!(llm.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_synthesize_answers_only_from_evidence() {
    let llm = Arc::new(RoutingLlm::default());
    let synthesizer = ReportSynthesizer::new(llm.clone(), 4000);
    let report = synthesizer
        .synthesize("x", CHECKLIST, &[row("a", "X is 5. - collected")], Utc::now())
        .await
        .unwrap();

    assert!(report.contains("1. X is 5."));
    assert!(report.contains("2. No information available"));

    let requests = llm.requests.lock().unwrap();
    let request = &requests[0];
    assert!(request.stream);
    assert_eq!(request.max_tokens, Some(4000));
    let user = &request.messages[1].content;
    assert!(user.contains("\"source_id\": 1"));
    assert!(user.contains("\"content\": \"X is 5. - collected\""));
    assert!(user.contains(CHECKLIST));
}

#[tokio::test]
async fn test_low_yield_report_is_distinct_outcome() {
    let llm = Arc::new(RoutingLlm {
        report_reply: Some("No information available".to_string()),
        ..Default::default()
    });
    let synthesizer = ReportSynthesizer::new(llm, 4000);
    let err = synthesizer
        .synthesize("x", CHECKLIST, &[row("a", "unrelated")], Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, ReportError::EmptyReport { .. }));
}
