//! Fetch-and-extract client.
//!
//! Turns a URL into the cleaned text of its main content region. Every
//! failure is returned as [`FetchOutcome::Failed`]; nothing escapes the
//! [`PageFetcher`] boundary as an error or a panic the caller must handle.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use shared_types::PageContent;

use crate::config::PipelineSettings;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("request timed out")]
    Timeout,
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("body read failed: {0}")]
    Body(String),
    #[error("cancelled before fetch started")]
    Cancelled,
    #[error("fetch task panicked: {0}")]
    Panicked(String),
}

/// Tagged result of fetching one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Page(PageContent),
    Failed(FetchError),
}

impl FetchOutcome {
    /// The page text when the fetch produced usable content.
    pub fn content(&self) -> Option<&PageContent> {
        match self {
            FetchOutcome::Page(page) if page.has_content() => Some(page),
            _ => None,
        }
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchOutcome;
}

// ============================================================================
// HTTP implementation
// ============================================================================

pub struct HttpPageFetcher {
    http: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(settings: &PipelineSettings) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(settings.fetch_timeout())
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Request(format!("http client: {e}")))?;
        Ok(Self { http })
    }

    pub fn with_timeout(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.to_string())
            .build()
            .map_err(|e| FetchError::Request(format!("http client: {e}")))?;
        Ok(Self { http })
    }

    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let url = url.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        let response = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Body(e.to_string())
            }
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        match self.fetch_html(url).await {
            Ok(html) => {
                let page = extract_page(&html);
                tracing::debug!(
                    url = %url,
                    title = %page.title,
                    chars = page.text.len(),
                    "Fetched page"
                );
                FetchOutcome::Page(page)
            }
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "Fetch failed");
                FetchOutcome::Failed(err)
            }
        }
    }
}

// ============================================================================
// Content extraction
// ============================================================================

const MAIN_REGION_SELECTORS: [&str; 3] = ["main", "article", "div[class*='content']"];

const STRIPPED_TAGS: [&str; 9] = [
    "script", "style", "nav", "footer", "iframe", "form", "header", "aside", "noscript",
];

const BLOCK_TAGS: [&str; 7] = ["h1", "h2", "h3", "p", "ul", "ol", "blockquote"];

const MIN_PARAGRAPH_CHARS: usize = 50;

/// Extract the title and main-region text of an HTML document.
///
/// Text blocks are headings, paragraphs over 50 characters, individual list
/// items and blockquotes, in document order and joined with newlines. A
/// document without a main region yields empty text.
pub fn extract_page(html: &str) -> PageContent {
    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "No Title".to_string());

    let Some(region) = main_region(&document) else {
        return PageContent::new(title, String::new());
    };

    let mut blocks = Vec::new();
    for node in region.descendants() {
        let Some(element) = ElementRef::wrap(node) else {
            continue;
        };
        let name = element.value().name();
        if !BLOCK_TAGS.contains(&name) || inside_stripped(element, region) {
            continue;
        }

        match name {
            "p" => {
                let text = visible_text(element, region);
                if text.chars().count() > MIN_PARAGRAPH_CHARS {
                    blocks.push(text);
                }
            }
            "ul" | "ol" => {
                for item in element.descendants().filter_map(ElementRef::wrap) {
                    if item.value().name() == "li" && !inside_stripped(item, region) {
                        blocks.push(visible_text(item, region));
                    }
                }
            }
            _ => blocks.push(visible_text(element, region)),
        }
    }

    PageContent::new(title, blocks.join("\n"))
}

fn main_region(document: &Html) -> Option<ElementRef<'_>> {
    MAIN_REGION_SELECTORS.iter().find_map(|raw| {
        Selector::parse(raw)
            .ok()
            .and_then(|sel| document.select(&sel).next())
    })
}

/// True if `element` or any ancestor below `region` is a stripped tag.
fn inside_stripped(element: ElementRef<'_>, region: ElementRef<'_>) -> bool {
    let mut current = Some(element);
    while let Some(el) = current {
        if el.id() == region.id() {
            return false;
        }
        if STRIPPED_TAGS.contains(&el.value().name()) {
            return true;
        }
        current = el.parent().and_then(ElementRef::wrap);
    }
    false
}

/// Whitespace-collapsed text of `element`, leaving out stripped descendants.
fn visible_text(element: ElementRef<'_>, region: ElementRef<'_>) -> String {
    let mut raw = String::new();
    for node in element.descendants() {
        if let Some(text) = node.value().as_text() {
            let parent = node.parent().and_then(ElementRef::wrap);
            if !parent.is_some_and(|p| inside_stripped(p, region)) {
                raw.push_str(text);
            }
        }
    }
    collapse_whitespace(&raw)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
