//! LLM completion collaborator.
//!
//! [`CompletionProvider`] is the narrow seam the rest of the crate talks to.
//! [`OpenRouterClient`] implements it against an OpenAI-compatible
//! `chat/completions` endpoint, either as a single JSON body or assembled
//! from a server-sent-event token stream.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::LlmConfig;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("missing API key")]
    MissingApiKey,
    #[error("request failed: {0}")]
    Request(String),
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("response parse failed: {0}")]
    Parse(String),
    #[error("model returned an empty response")]
    EmptyResponse,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            stream: false,
            max_tokens: None,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Anything that can turn a list of chat messages into generated text.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;
}

/// Send a trivial prompt and require a non-empty answer.
pub async fn verify_connection(provider: &dyn CompletionProvider) -> Result<(), LlmError> {
    let request = CompletionRequest::new(vec![ChatMessage::user(
        "Test connection - please respond with 'OK'",
    )]);
    let reply = provider.complete(request).await?;
    if reply.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    tracing::info!("LLM connection verified");
    Ok(())
}

// ============================================================================
// OpenRouter (OpenAI-compatible) client
// ============================================================================

pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenRouterClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(LlmError::MissingApiKey)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Request(format!("http client: {e}")))?;

        Ok(Self {
            http,
            api_key,
            model: config.model.clone(),
            endpoint: config.base_url.clone(),
        })
    }

    fn payload(&self, request: &CompletionRequest) -> Value {
        let mut payload = serde_json::json!({
            "model": self.model,
            "messages": request.messages,
            "stream": request.stream,
        });
        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = serde_json::json!(max_tokens);
        }
        payload
    }

    async fn read_stream(&self, response: reqwest::Response) -> Result<String, LlmError> {
        let mut lines = SseLineBuffer::default();
        let mut assembled = String::new();
        let mut bytes = response.bytes_stream();

        'frames: while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| LlmError::Request(format!("stream read: {e}")))?;
            for line in lines.push(&chunk) {
                if apply_frame(parse_sse_line(&line), &mut assembled)? {
                    break 'frames;
                }
            }
        }
        if let Some(line) = lines.finish() {
            apply_frame(parse_sse_line(&line), &mut assembled)?;
        }

        Ok(assembled)
    }
}

/// Fold one frame into the assembled text. Returns true once the stream is done.
fn apply_frame(frame: SseFrame, assembled: &mut String) -> Result<bool, LlmError> {
    match frame {
        SseFrame::Delta(token) => {
            tracing::trace!(token = %token, "stream token");
            assembled.push_str(&token);
            Ok(false)
        }
        SseFrame::Done => Ok(true),
        SseFrame::Ignored => Ok(false),
        SseFrame::Malformed(reason) => {
            tracing::debug!(reason = %reason, "Skipping malformed stream frame");
            Ok(false)
        }
        SseFrame::Error(message) => Err(LlmError::Api {
            status: 200,
            message,
        }),
    }
}

#[async_trait]
impl CompletionProvider for OpenRouterClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        tracing::debug!(
            model = %self.model,
            messages = request.messages.len(),
            stream = request.stream,
            "Sending completion request"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&self.payload(&request))
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        if request.stream {
            return self.read_stream(response).await;
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        parse_completion_body(&body)
    }
}

/// Extract `choices[0].message.content` from a non-streaming completion body.
pub fn parse_completion_body(body: &Value) -> Result<String, LlmError> {
    if let Some(content) = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
    {
        return Ok(content.to_string());
    }
    if let Some(message) = body
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
    {
        return Err(LlmError::Api {
            status: 200,
            message: message.to_string(),
        });
    }
    Err(LlmError::Parse("missing choices[0].message.content".to_string()))
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| body.chars().take(500).collect())
}

// ============================================================================
// Server-sent events
// ============================================================================

/// One decoded line of a completion stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// A token of generated text
    Delta(String),
    /// The `[DONE]` terminator
    Done,
    /// Blank lines, comments, keep-alives, role-only deltas
    Ignored,
    /// A `data:` line whose payload is not valid JSON
    Malformed(String),
    /// An error object sent mid-stream
    Error(String),
}

pub fn parse_sse_line(line: &str) -> SseFrame {
    let line = line.trim_end_matches('\r');
    if line.is_empty() || line.starts_with(':') {
        return SseFrame::Ignored;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return SseFrame::Ignored;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseFrame::Done;
    }

    let json: Value = match serde_json::from_str(data) {
        Ok(json) => json,
        Err(e) => return SseFrame::Malformed(e.to_string()),
    };
    if let Some(message) = json
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
    {
        return SseFrame::Error(message.to_string());
    }

    match json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(Value::as_str)
    {
        Some(token) if !token.is_empty() => SseFrame::Delta(token.to_string()),
        _ => SseFrame::Ignored,
    }
}

/// Reassembles complete lines from arbitrarily split network chunks.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    /// Append a chunk and drain every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        lines
    }

    /// Whatever trailing text arrived without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}
