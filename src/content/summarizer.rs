use crate::content::Summarizer;
use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Input longer than this many characters is cut before prompting.
const MAX_INPUT_CHARS: usize = 4000;
const MAX_RESPONSE_SIZE: usize = 1024 * 1024; // 1MB
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_MAX_TOKENS: u32 = 500;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("Nothing to summarize")]
    EmptyContent,
    #[error("Request timed out after 60s")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("No choices returned")]
    NoChoices,
}

/// Settings for [`ChatSummarizer`].
///
/// Custom `Debug` masks the API key.
pub struct ChatSummarizerConfig {
    /// Base URL of an OpenAI-compatible API, without `/chat/completions`.
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub api_key: Option<SecretString>,
}

impl Default for ChatSummarizerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            api_key: None,
        }
    }
}

impl std::fmt::Debug for ChatSummarizerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSummarizerConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

/// Summarizes text through an OpenAI-compatible chat completions API.
///
/// One HTTP request per call, no internal retries: a failed summary only
/// leaves one item unannotated for this cycle.
pub struct ChatSummarizer {
    client: reqwest::Client,
    config: ChatSummarizerConfig,
}

impl ChatSummarizer {
    pub fn new(client: reqwest::Client, config: ChatSummarizerConfig) -> Self {
        tracing::info!(
            endpoint = %config.endpoint,
            model = %config.model,
            max_tokens = config.max_tokens,
            temperature = config.temperature,
            "Initializing summarizer"
        );
        Self { client, config }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }
}

/// Cuts `text` to at most `max_chars` characters, marking the cut with "...".
fn truncate_chars(text: &str, max_chars: usize) -> std::borrow::Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]).into(),
        None => text.into(),
    }
}

fn build_prompt(text: &str) -> String {
    format!(
        "Summarize the main points of the following article concisely, highlighting the key facts:\n\n{}",
        truncate_chars(text, MAX_INPUT_CHARS)
    )
}

#[async_trait]
impl Summarizer for ChatSummarizer {
    async fn summarize(&self, text: &str) -> Result<String, AnnotationError> {
        if text.trim().is_empty() {
            return Err(AnnotationError::EmptyContent);
        }

        let original_chars = text.chars().count();
        if original_chars > MAX_INPUT_CHARS {
            tracing::debug!(
                original_chars,
                truncated_chars = MAX_INPUT_CHARS,
                "Content truncated for summarization"
            );
        }

        let prompt = build_prompt(text);
        let body = serde_json::to_vec(&ChatRequest {
            model: &self.config.model,
            messages: [ChatMessage {
                role: "user",
                content: &prompt,
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        })?;

        let mut request = self
            .client
            .post(self.completions_url())
            .timeout(REQUEST_TIMEOUT)
            .header("Content-Type", "application/json")
            .body(body);
        if let Some(key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {}", key.expose_secret()));
        }

        let response = tokio::time::timeout(REQUEST_TIMEOUT, request.send())
            .await
            .map_err(|_| AnnotationError::Timeout)?
            .map_err(AnnotationError::Network)?;

        if !response.status().is_success() {
            return Err(AnnotationError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
        let parsed: ChatResponse = serde_json::from_slice(&bytes)?;

        let summary = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(AnnotationError::NoChoices)?;

        tracing::debug!(summary_len = summary.len(), "Summary generated");
        Ok(summary)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, AnnotationError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(AnnotationError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(AnnotationError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(AnnotationError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}
