//! Search-results collaborator.
//!
//! Discovers candidate pages for a keyword through the DataForSEO live
//! organic SERP endpoint.

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use serde_json::Value;
use shared_types::{DiscoveredUrl, DEFAULT_SOURCE};

use crate::config::SearchConfig;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("missing search credentials: {0}")]
    MissingCredentials(String),
    #[error("search request failed: {0}")]
    Request(String),
    #[error("search API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("search response parse failed: {0}")]
    Parse(String),
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Ranked, filtered candidate URLs for `keyword`, at most `max_urls` of them.
    async fn search(&self, keyword: &str, max_urls: usize)
        -> Result<Vec<DiscoveredUrl>, SearchError>;
}

pub struct DataForSeoSearch {
    http: reqwest::Client,
    endpoint: String,
    authorization: String,
    location_code: u32,
    language_code: String,
    excluded_domains: Vec<String>,
}

impl DataForSeoSearch {
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        let login = non_empty(config.api_login.as_deref())
            .ok_or_else(|| SearchError::MissingCredentials("api_login".to_string()))?;
        let password = non_empty(config.api_password.as_deref())
            .ok_or_else(|| SearchError::MissingCredentials("api_password".to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| SearchError::Request(format!("http client: {e}")))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            authorization: basic_auth(login, password),
            location_code: config.location_code,
            language_code: config.language_code.clone(),
            excluded_domains: config.excluded_domains.clone(),
        })
    }
}

#[async_trait]
impl SearchProvider for DataForSeoSearch {
    async fn search(
        &self,
        keyword: &str,
        max_urls: usize,
    ) -> Result<Vec<DiscoveredUrl>, SearchError> {
        let payload = serde_json::json!([{
            "keyword": keyword,
            "location_code": self.location_code,
            "language_code": self.language_code,
        }]);

        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Api {
                status: status.as_u16(),
                message: body.chars().take(500).collect(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SearchError::Parse(e.to_string()))?;
        let urls = serp_item_urls(&body)?;
        let discovered = filter_results(urls, &self.excluded_domains, max_urls);

        tracing::info!(
            keyword = %keyword,
            found = discovered.len(),
            "Search results collected"
        );
        Ok(discovered)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn basic_auth(login: &str, password: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{login}:{password}"));
    format!("Basic {encoded}")
}

/// URLs of `tasks[0].result[0].items[*]`, in ranking order.
pub fn serp_item_urls(body: &Value) -> Result<Vec<String>, SearchError> {
    let items = body
        .get("tasks")
        .and_then(|t| t.get(0))
        .and_then(|t| t.get("result"))
        .and_then(|r| r.get(0))
        .and_then(|r| r.get("items"))
        .and_then(Value::as_array)
        .ok_or_else(|| SearchError::Parse("missing tasks[0].result[0].items".to_string()))?;

    Ok(items
        .iter()
        .filter_map(|item| item.get("url").and_then(Value::as_str))
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(ToString::to_string)
        .collect())
}

/// Drop search-engine pages, denylisted hosts and duplicates, keep the first
/// `max_urls`, then order by collection time, newest first.
pub fn filter_results(
    urls: Vec<String>,
    excluded_domains: &[String],
    max_urls: usize,
) -> Vec<DiscoveredUrl> {
    // One discovery time for the whole batch.
    let collected_at = Utc::now();
    let mut kept: Vec<DiscoveredUrl> = Vec::new();
    for raw in urls {
        if raw.to_lowercase().contains("google.com/search") {
            continue;
        }
        let host = host_of(&raw);
        if let Some(host) = host.as_deref() {
            if excluded_domains.iter().any(|d| host.contains(d.as_str())) {
                continue;
            }
        }
        if kept.iter().any(|d| d.url == raw) {
            continue;
        }
        let source = host.unwrap_or_else(|| DEFAULT_SOURCE.to_string());
        kept.push(DiscoveredUrl::at(raw, source, collected_at));
        if kept.len() == max_urls {
            break;
        }
    }
    // Stable, so equal timestamps keep ranking order.
    kept.sort_by(|a, b| b.collected_at.cmp(&a.collected_at));
    kept
}

fn host_of(raw: &str) -> Option<String> {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
}
