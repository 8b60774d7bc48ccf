//! Final report synthesis.
//!
//! The model sees the whole evidence set as numbered JSON records plus the
//! checklist, and must answer each question from that evidence alone.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use shared_types::{EvidenceRow, NO_INFORMATION_SENTINEL};

use crate::clients::llm::{ChatMessage, CompletionProvider, CompletionRequest, LlmError};

/// Replies shorter than this that still carry the "no information" phrase are
/// treated as empty reports.
const LOW_YIELD_REPORT_CHARS: usize = 50;
const MAX_SLUG_CHARS: usize = 50;
const REPORT_FILE_SUFFIX: &str = "_final_summary.txt";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("no evidence collected for this query")]
    NoEvidence,
    #[error("model found no usable information in the evidence")]
    EmptyReport { response: String },
    #[error("report generation failed: {0}")]
    Llm(#[from] LlmError),
    #[error("failed to write report {path}: {message}")]
    Write { path: String, message: String },
}

/// One evidence row as the model sees it.
#[derive(Debug, Serialize)]
struct EvidenceRecord<'a> {
    source_id: usize,
    url: &'a str,
    content: &'a str,
    collected_at: String,
    source: &'a str,
}

pub struct ReportSynthesizer {
    llm: Arc<dyn CompletionProvider>,
    max_tokens: u32,
}

impl ReportSynthesizer {
    pub fn new(llm: Arc<dyn CompletionProvider>, max_tokens: u32) -> Self {
        Self { llm, max_tokens }
    }

    pub async fn synthesize(
        &self,
        query: &str,
        checklist: &str,
        evidence: &[EvidenceRow],
        now: DateTime<Utc>,
    ) -> Result<String, ReportError> {
        if evidence.is_empty() {
            return Err(ReportError::NoEvidence);
        }

        tracing::info!(
            query = %query,
            sources = evidence.len(),
            "Synthesizing report"
        );

        let request = CompletionRequest::new(vec![
            ChatMessage::system(system_prompt(now)),
            ChatMessage::user(user_prompt(checklist, evidence)),
        ])
        .streaming()
        .max_tokens(self.max_tokens);

        let report = self.llm.complete(request).await?;
        classify_report(report)
    }
}

fn classify_report(report: String) -> Result<String, ReportError> {
    let trimmed = report.trim();
    if trimmed.is_empty()
        || (trimmed.contains(NO_INFORMATION_SENTINEL)
            && trimmed.chars().count() < LOW_YIELD_REPORT_CHARS)
    {
        return Err(ReportError::EmptyReport { response: report });
    }
    Ok(trimmed.to_string())
}

fn system_prompt(now: DateTime<Utc>) -> String {
    let stamp = now.format("%Y-%m-%d %H:%M:%S");
    let date = now.format("%Y-%m-%d");
    format!(
        "You are a database query tool speaking from {stamp}.
CRITICAL RULES:
- Answer EACH verification question with EXACT facts from database
- Reference the question number before each answer
- Keep answers concise and eliminate redundancy
- NO repeating the same information in different ways
- NO creativity or narrative
- NO interpretation
- NO additional context
- EXACT QUOTES only
- If no answer found, state '{NO_INFORMATION_SENTINEL}'
- Use PRESENT TENSE for events after {date}
- Use PAST TENSE for events before {date}
- DO NOT include URLs with each fact
- List sources only once at the end"
    )
}

fn user_prompt(checklist: &str, evidence: &[EvidenceRow]) -> String {
    format!(
        "Using ONLY this database content:

{}

Answer ALL of these verification questions:

{checklist}

Answer the questions in a concise easy to understand format
Additional Key Facts (if any):
- fact: detail

Sources:
- List all sources with IDs only once at the end",
        evidence_json(evidence)
    )
}

fn evidence_json(evidence: &[EvidenceRow]) -> String {
    let records: Vec<EvidenceRecord<'_>> = evidence
        .iter()
        .enumerate()
        .map(|(idx, row)| EvidenceRecord {
            source_id: idx + 1,
            url: &row.url,
            content: &row.summary,
            collected_at: row.collected_at.to_rfc3339(),
            source: &row.source,
        })
        .collect();
    // Serializing borrowed strings and integers cannot fail.
    serde_json::to_string_pretty(&records).unwrap_or_default()
}

/// Filename-safe slug of a query: ASCII alphanumerics and underscores only,
/// at most 50 characters, no leading or trailing underscore.
pub fn sanitize_filename(query: &str) -> String {
    let unsafe_chars = Regex::new(r"[^A-Za-z0-9_]").ok();
    let replaced = unsafe_chars
        .as_ref()
        .map(|re| re.replace_all(query, "_").to_string())
        .unwrap_or_else(|| query.to_string());
    let slug: String = replaced.trim_matches('_').chars().take(MAX_SLUG_CHARS).collect();
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "query".to_string()
    } else {
        slug.to_string()
    }
}

pub fn report_path(data_dir: &Path, query: &str) -> PathBuf {
    data_dir.join(format!("{}{REPORT_FILE_SUFFIX}", sanitize_filename(query)))
}

/// Write `report` to `<data_dir>/<slug>_final_summary.txt`.
pub async fn write_report(
    data_dir: &Path,
    query: &str,
    report: &str,
) -> Result<PathBuf, ReportError> {
    let path = report_path(data_dir, query);
    let write_err = |e: std::io::Error| ReportError::Write {
        path: path.display().to_string(),
        message: e.to_string(),
    };
    tokio::fs::create_dir_all(data_dir).await.map_err(write_err)?;
    tokio::fs::write(&path, report).await.map_err(write_err)?;
    tracing::info!(path = %path.display(), "Report written");
    Ok(path)
}
