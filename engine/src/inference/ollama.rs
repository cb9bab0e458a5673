//! Ollama inference client
//!
//! Implements the `InferenceClient` trait against a local Ollama server,
//! typically at http://localhost:11434. The client enforces a 5 second
//! connect timeout and a 120 second total request timeout (both
//! configurable) and maps transport failures onto the engine error
//! taxonomy so the orchestrator can record them on failed subtasks.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{
    GenerationOptions, InferenceClient, Message, MessageRole, ModelSelector, TaskClass, TokenStream,
};
use crate::config::InferenceConfig;
use crate::errors::{EngineError, Result};

/// Client for the Ollama chat API
pub struct OllamaClient {
    /// Base URL for the Ollama API (typically http://localhost:11434)
    base_url: String,

    /// HTTP client with connect and total timeouts applied
    http: Client,

    /// Task class to model name resolution
    selector: ModelSelector,

    /// Cached tag list from /api/tags, refreshed lazily
    available: Arc<RwLock<Option<Vec<String>>>>,
}

impl OllamaClient {
    /// Create a new client from the inference configuration
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.host.trim_end_matches('/').to_string(),
            http,
            selector: ModelSelector::new(config.models.clone(), config.default_model.clone()),
            available: Arc::new(RwLock::new(None)),
        })
    }

    /// Base URL this client talks to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve the model for a task class, consulting the cached tag list
    ///
    /// The tag list is fetched once and cached; if the backend cannot be
    /// reached the preferred model is used unchecked and the real request
    /// reports the failure.
    async fn resolve_model(&self, class: TaskClass) -> String {
        {
            let cached = self.available.read().await;
            if let Some(tags) = cached.as_ref() {
                return self.selector.resolve(class, Some(tags));
            }
        }

        match self.fetch_tags().await {
            Ok(tags) => {
                let model = self.selector.resolve(class, Some(&tags));
                *self.available.write().await = Some(tags);
                model
            }
            Err(e) => {
                tracing::debug!("Could not list models ({}), using preferred model", e);
                self.selector.resolve(class, None)
            }
        }
    }

    async fn fetch_tags(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.http.get(&url).send().await.map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::InferenceBackend(format!("{}: {}", status, body)));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| EngineError::InferenceBackend(format!("invalid tags response: {}", e)))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    fn convert_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|msg| WireMessage {
                role: match msg.role {
                    MessageRole::User => "user".to_string(),
                    MessageRole::Assistant => "assistant".to_string(),
                    MessageRole::System => "system".to_string(),
                },
                content: msg.content.clone(),
            })
            .collect()
    }

    fn build_request(
        &self,
        model: String,
        messages: &[Message],
        options: &GenerationOptions,
        stream: bool,
    ) -> ChatRequest {
        ChatRequest {
            model,
            messages: Self::convert_messages(messages),
            stream,
            options: if options.is_empty() {
                None
            } else {
                Some(options.clone())
            },
        }
    }
}

/// Map a reqwest error onto the engine taxonomy
fn map_transport_error(e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::InferenceTimeout
    } else if e.is_connect() {
        EngineError::InferenceUnreachable(e.to_string())
    } else {
        EngineError::InferenceUnreachable(format!("transport error: {}", e))
    }
}

#[async_trait]
impl InferenceClient for OllamaClient {
    async fn chat(
        &self,
        class: TaskClass,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<String> {
        let model = self.resolve_model(class).await;
        let request = self.build_request(model, messages, options, false);

        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            "ollama chat request"
        );

        let url = format!("{}/api/chat", self.base_url);
        let start = std::time::Instant::now();
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::InferenceBackend(format!("{}: {}", status, body)));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            EngineError::InferenceBackend(format!("invalid chat response: {}", e))
        })?;

        tracing::info!(
            model = %request.model,
            elapsed_s = start.elapsed().as_secs_f64(),
            "ollama response received"
        );

        Ok(chat.message.content)
    }

    async fn chat_stream(
        &self,
        class: TaskClass,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<TokenStream> {
        let model = self.resolve_model(class).await;
        let request = self.build_request(model, messages, options, true);

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::InferenceBackend(format!("{}: {}", status, body)));
        }

        // Ollama streams one JSON object per line; chunks may split lines,
        // so a carry buffer stitches them back together.
        let stream = try_stream! {
            let mut bytes = response.bytes_stream();
            let mut carry = String::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(map_transport_error)?;
                carry.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = carry.find('\n') {
                    let line: String = carry.drain(..=newline).collect();
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    let parsed: StreamChunk = serde_json::from_str(line).map_err(|e| {
                        EngineError::InferenceBackend(format!("invalid stream chunk: {}", e))
                    })?;

                    if let Some(message) = parsed.message {
                        if !message.content.is_empty() {
                            yield message.content;
                        }
                    }

                    if parsed.done {
                        return;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let tags = self.fetch_tags().await?;
        *self.available.write().await = Some(tags.clone());
        Ok(tags)
    }

    async fn check_health(&self) -> bool {
        self.fetch_tags().await.is_ok()
    }
}

/// Ollama chat request format
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerationOptions>,
}

/// Ollama message format
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

/// Ollama chat response format
#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: WireMessage,
    #[allow(dead_code)]
    done: bool,
}

/// One line of a streaming chat response
#[derive(Debug, Deserialize)]
struct StreamChunk {
    message: Option<WireMessage>,
    #[serde(default)]
    done: bool,
}

/// Response from /api/tags
#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}
