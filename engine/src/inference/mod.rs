//! Inference client abstraction
//!
//! This module provides the narrow interface the engine uses to talk to
//! the local model-serving endpoint. The `InferenceClient` trait defines
//! the contract; `OllamaClient` is the production implementation and tests
//! supply fakes, so the orchestrator never depends on a live backend.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::Result;

pub mod ollama;
pub mod selector;

pub use ollama::OllamaClient;
pub use selector::ModelSelector;

/// Message in a conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (user, assistant, system)
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User message
    User,

    /// Assistant message
    Assistant,

    /// System message
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// Broad class of work a request belongs to, used for model selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskClass {
    /// Code generation and review
    Code,

    /// Multi-step reasoning and analysis
    Reasoning,

    /// Single-turn chat
    Conversation,

    /// Everything else
    General,
}

impl fmt::Display for TaskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskClass::Code => write!(f, "code"),
            TaskClass::Reasoning => write!(f, "reasoning"),
            TaskClass::Conversation => write!(f, "conversation"),
            TaskClass::General => write!(f, "general"),
        }
    }
}

/// Generation parameters forwarded to the backend
///
/// All fields are optional; `None` leaves the backend's own default in
/// place. Serialized with `skip_serializing_if` so the wire payload only
/// carries what the caller set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
}

impl GenerationOptions {
    /// True when no parameter is set
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Stream of response text deltas
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Client for the local model-serving endpoint
///
/// Implementations MUST enforce a 5 second connect timeout and a 120
/// second total request timeout, mapping failures onto the engine error
/// taxonomy: `InferenceTimeout` for deadline overruns,
/// `InferenceUnreachable` for connection failures, `InferenceBackend` for
/// non-2xx backend responses.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Run a chat completion and return the full response text
    ///
    /// The model is resolved from the task class by the implementation.
    async fn chat(
        &self,
        class: TaskClass,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<String>;

    /// Run a chat completion, streaming response text deltas
    async fn chat_stream(
        &self,
        class: TaskClass,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<TokenStream>;

    /// List the model tags the backend reports as available
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Check if the backend is currently reachable
    async fn check_health(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, MessageRole::User);
        assert_eq!(user_msg.content, "Hello");

        let assistant_msg = Message::assistant("Hi there");
        assert_eq!(assistant_msg.role, MessageRole::Assistant);

        let system_msg = Message::system("You are a planner");
        assert_eq!(system_msg.role, MessageRole::System);
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::user("test");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"user""#));

        let deserialized: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, deserialized);
    }

    #[test]
    fn test_options_skip_unset_fields() {
        let options = GenerationOptions {
            temperature: Some(0.2),
            ..Default::default()
        };

        let json = serde_json::to_string(&options).unwrap();
        assert!(json.contains("temperature"));
        assert!(!json.contains("top_k"));
        assert!(!json.contains("num_ctx"));
    }

    #[test]
    fn test_options_is_empty() {
        assert!(GenerationOptions::default().is_empty());
        assert!(!GenerationOptions {
            num_predict: Some(256),
            ..Default::default()
        }
        .is_empty());
    }

    #[test]
    fn test_task_class_display() {
        assert_eq!(TaskClass::Code.to_string(), "code");
        assert_eq!(TaskClass::Conversation.to_string(), "conversation");
    }
}
