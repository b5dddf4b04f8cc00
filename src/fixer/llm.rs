//! Chat-completion client for OpenAI-compatible endpoints.
//!
//! `POST {base_url}/v1/chat/completions`, non-streaming, with a system and a user
//! message. The client carries its own timeout; callers never wait unbounded.

use async_trait::async_trait;
use reqwest::header;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, instrument};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("AI service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("AI service returned HTTP {status}: {snippet}")]
    Status { status: u16, snippet: String },

    #[error("AI service response could not be decoded: {0}")]
    Decode(String),

    #[error("AI service returned no choices")]
    EmptyChoices,

    #[error("AI service client misconfigured: {0}")]
    Config(String),
}

/// One completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Return the assistant's text for `request`.
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;
}

#[derive(Debug)]
pub struct OpenAiClient {
    http: reqwest::Client,
    model: String,
    url_chat: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let base = base_url.trim().trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(LlmError::Config(format!(
                "base URL must start with http:// or https://, got {base_url:?}"
            )));
        }

        let mut headers = header::HeaderMap::new();
        let auth = header::HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| LlmError::Config(format!("invalid API key header: {e}")))?;
        headers.insert(header::AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            model: model.to_string(),
            url_chat: format!("{base}/v1/chat/completions"),
        })
    }
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatModel for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.model, prompt_len = request.user.len()))]
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let started = Instant::now();
        let body = CompletionBody {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: &request.system,
                },
                Message {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self.http.post(&self.url_chat).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(300).collect();
            error!(status = status.as_u16(), %snippet, "chat completion returned non-success status");
            return Err(LlmError::Status {
                status: status.as_u16(),
                snippet,
            });
        }

        let decoded: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(format!("{e}; expected `choices[0].message.content`")))?;

        let content = decoded
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyChoices)?
            .message
            .content
            .unwrap_or_default();

        debug!(
            latency_ms = started.elapsed().as_millis() as u64,
            reply_len = content.len(),
            "chat completion finished"
        );
        Ok(content)
    }
}
