//! Shared types for the OverWatch research pipeline
//!
//! These types are used by:
//! - the evidence store (persisted rows)
//! - the scrape-then-summarize pipeline (discovered URLs, fetched pages)
//! - the report synthesizer (query + checklist + evidence)
//!
//! Serializable with serde so evidence can be embedded verbatim in prompts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Sentinel Text
// ============================================================================

/// Summary recorded for a URL whose fetch failed or produced no usable text.
pub const NO_CONTENT_SENTINEL: &str = "No content available";

/// Phrase the report model must use for a checklist item with no supporting evidence.
pub const NO_INFORMATION_SENTINEL: &str = "No information available";

/// Summary recorded when the model answered but found nothing relevant.
pub const NO_RELEVANT_INFORMATION: &str = "No relevant information found";

/// Prefix of the summary recorded when summarization itself failed.
pub const PROCESSING_ERROR_PREFIX: &str = "Processing error: ";

/// Source tag used when a URL has no parseable host.
pub const DEFAULT_SOURCE: &str = "web";

/// Build the processing-error sentinel for a failed summarization.
pub fn processing_error(detail: impl std::fmt::Display) -> String {
    format!("{PROCESSING_ERROR_PREFIX}{detail}")
}

/// True when `summary` is one of the placeholder strings rather than real findings.
pub fn is_sentinel(summary: &str) -> bool {
    summary == NO_CONTENT_SENTINEL
        || summary == NO_RELEVANT_INFORMATION
        || summary.starts_with(PROCESSING_ERROR_PREFIX)
}

// ============================================================================
// Query Records
// ============================================================================

/// Identifier of a persisted query record. Scopes every evidence read and write.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(pub i64);

impl QueryId {
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One user-submitted query and the fact-verification checklist generated for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryRecord {
    pub id: QueryId,
    /// The user's literal request
    pub query: String,
    /// Generated fact-verification questions
    pub checklist: String,
    pub submitted_at: DateTime<Utc>,
}

// ============================================================================
// Evidence
// ============================================================================

/// A persisted (URL, summary) outcome of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvidenceRow {
    pub query_id: QueryId,
    pub url: String,
    /// Checklist-focused bullets, or a sentinel string
    pub summary: String,
    pub collected_at: DateTime<Utc>,
    /// Domain of the page, or a fixed tag
    pub source: String,
}

/// Evidence to upsert for the current query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvidence {
    pub url: String,
    pub summary: String,
    pub collected_at: DateTime<Utc>,
    pub source: String,
}

impl NewEvidence {
    pub fn new(
        url: impl Into<String>,
        summary: impl Into<String>,
        collected_at: DateTime<Utc>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            summary: summary.into(),
            collected_at,
            source: source.into(),
        }
    }

    /// Evidence for a discovered URL, inheriting its discovery timestamp and source.
    pub fn for_url(discovered: &DiscoveredUrl, summary: impl Into<String>) -> Self {
        Self {
            url: discovered.url.clone(),
            summary: summary.into(),
            collected_at: discovered.collected_at,
            source: discovered.source.clone(),
        }
    }
}

// ============================================================================
// Discovery + Fetch
// ============================================================================

/// A candidate page returned by the search-results provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveredUrl {
    pub url: String,
    pub collected_at: DateTime<Utc>,
    pub source: String,
}

impl DiscoveredUrl {
    pub fn new(url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            collected_at: Utc::now(),
            source: source.into(),
        }
    }

    /// A candidate stamped with an explicit discovery time.
    pub fn at(
        url: impl Into<String>,
        source: impl Into<String>,
        collected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            url: url.into(),
            collected_at,
            source: source.into(),
        }
    }
}

/// Cleaned text extracted from a fetched page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PageContent {
    pub title: String,
    /// Newline-joined text blocks from the main content region
    pub text: String,
}

impl PageContent {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
        }
    }

    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty()
    }
}
