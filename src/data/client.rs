// ABOUTME: Remote completion primitive used by the session controller
// Defines the CompletionClient seam and an OpenAI-compatible HTTP implementation

use crate::app::settings::RequestSettings;
use crate::data::conversation::Message;
use crate::utils::cost_calculator::TokenUsage;
use crate::utils::error::{ChatMeterError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("stop") => Self::Stop,
            Some("length") => Self::Length,
            Some("content_filter") => Self::ContentFilter,
            Some(other) => Self::Other(other.to_string()),
            None => Self::Other("none".to_string()),
        }
    }

    /// Only a natural stop counts as a complete exchange
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Stop)
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Length => write!(f, "length"),
            Self::ContentFilter => write!(f, "content_filter"),
            Self::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// Result of one completion call
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Model id reported by the provider, which may carry a dated suffix
    pub model: String,
    pub reply: String,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
}

/// Blocking-from-the-caller's-view request/response primitive.
///
/// Timeouts belong to the implementation; callers never cancel a call in flight.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, settings: &RequestSettings, messages: &[Message])
        -> Result<Completion>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
    frequency_penalty: f64,
    presence_penalty: f64,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponseChoice {
    message: ChatResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<ChatResponseChoice>,
    usage: Option<TokenUsage>,
}

/// Client for OpenAI-compatible `/chat/completions` endpoints
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn parse_response(requested_model: &str, body: ChatResponse) -> Result<Completion> {
        let usage = body.usage.ok_or_else(|| {
            ChatMeterError::RemoteCall("response carried no usage metadata".to_string())
        })?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatMeterError::RemoteCall("response had no choices".to_string()))?;

        Ok(Completion {
            model: body.model.unwrap_or_else(|| requested_model.to_string()),
            reply: choice.message.content.unwrap_or_default(),
            usage,
            finish_reason: FinishReason::parse(choice.finish_reason.as_deref()),
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(
        &self,
        settings: &RequestSettings,
        messages: &[Message],
    ) -> Result<Completion> {
        let request = ChatRequest {
            model: &settings.model,
            messages,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            top_p: settings.top_p,
            frequency_penalty: settings.frequency_penalty,
            presence_penalty: settings.presence_penalty,
        };

        tracing::debug!(model = %settings.model, messages = messages.len(), "sending completion request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatMeterError::RemoteCall(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ChatMeterError::RemoteCall(format!(
                "HTTP {}: {}",
                status, error_body
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ChatMeterError::RemoteCall(format!("Failed to parse response: {}", e)))?;

        Self::parse_response(&settings.model, body)
    }
}
