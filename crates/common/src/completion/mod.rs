//! Text-generation backend abstraction
//!
//! A completion is returned as a [`DeltaStream`]: a lazy sequence of text
//! deltas. Dropping the stream cancels it; a new call is the only way to
//! produce the text again.

use crate::config::CompletionConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Incremental text deltas of one completion
pub type DeltaStream = BoxStream<'static, Result<String>>;

/// A system + user message pair sent to the backend
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: Option<f32>,
}

/// Trait for streaming text generation
#[async_trait]
pub trait Completer: Send + Sync {
    /// Open a streaming completion
    async fn complete(&self, request: CompletionRequest) -> Result<DeltaStream>;

    /// Provider name
    fn provider(&self) -> &str;
}

/// OpenAI-compatible chat completions client
pub struct OpenAICompleter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChatChunkChoice>,
}

#[derive(Deserialize)]
struct ChatChunkChoice {
    #[serde(default)]
    delta: ChatDelta,
}

#[derive(Default, Deserialize)]
struct ChatDelta {
    content: Option<String>,
}

impl OpenAICompleter {
    /// Create a new client. The timeout bounds connection setup only;
    /// streams may run longer than any fixed request timeout.
    pub fn new(api_key: String, base_url: Option<String>, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        })
    }
}

/// Decode one server-sent event payload into an optional text delta
fn parse_delta(data: &str) -> Result<Option<String>> {
    let chunk: ChatChunk = serde_json::from_str(data).map_err(|e| AppError::CompletionError {
        message: format!("Malformed stream chunk: {}", e),
    })?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

#[async_trait]
impl Completer for OpenAICompleter {
    async fn complete(&self, request: CompletionRequest) -> Result<DeltaStream> {
        let body = ChatRequest {
            model: &request.model,
            messages: vec![
                ChatMessage { role: "system", content: &request.system },
                ChatMessage { role: "user", content: &request.user },
            ],
            temperature: request.temperature,
            stream: true,
        };

        let response = self.client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::CompletionError {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::CompletionError {
                message: format!("API error {}: {}", status, body),
            });
        }

        let deltas = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                let done = matches!(event, Ok(event) if event.data.trim() == "[DONE]");
                futures::future::ready(!done)
            })
            .filter_map(|event| async move {
                match event {
                    Ok(event) => parse_delta(&event.data).transpose(),
                    Err(e) => Some(Err(AppError::CompletionError {
                        message: format!("Stream interrupted: {}", e),
                    })),
                }
            });

        Ok(deltas.boxed())
    }

    fn provider(&self) -> &str {
        "openai"
    }
}

/// Mock completer for development and testing
pub struct MockCompleter {
    reply: String,
}

impl MockCompleter {
    pub fn new() -> Self {
        Self::with_reply(
            "Based on the provided context, the documents discuss this topic [1]. \
            [Mock response - completion API key not configured]",
        )
    }

    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self { reply: reply.into() }
    }
}

impl Default for MockCompleter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Completer for MockCompleter {
    async fn complete(&self, _request: CompletionRequest) -> Result<DeltaStream> {
        let words: Vec<Result<String>> = self
            .reply
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();
        Ok(stream::iter(words).boxed())
    }

    fn provider(&self) -> &str {
        "mock"
    }
}

/// Create a completer based on configuration
pub fn create_completer(config: &CompletionConfig) -> Result<Arc<dyn Completer>> {
    match config.provider.as_str() {
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "completion.api_key is required for the openai provider".to_string(),
            })?;
            Ok(Arc::new(OpenAICompleter::new(
                key,
                config.api_base.clone(),
                config.timeout(),
            )?))
        }
        "mock" => Ok(Arc::new(MockCompleter::new())),
        other => Err(AppError::Configuration {
            message: format!("Unknown completion provider: {}", other),
        }),
    }
}
