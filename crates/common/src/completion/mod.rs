//! Chat completion abstraction
//!
//! Provides a unified interface over OpenAI-compatible chat completion APIs:
//! - Synchronous completion returning the trimmed answer text
//! - Server-sent-event streaming of content fragments
//! - A minimal connectivity self-test

mod messages;
mod mock;
mod openai;

pub use messages::{multi_turn_messages, single_turn_messages, MULTI_TURN_PERSONA, SINGLE_TURN_PERSONA};
pub use mock::{MockBehavior, MockCompletionClient};
pub use openai::OpenAiCompletionClient;

use crate::config::CompletionConfig;
use crate::errors::{AppError, Result};
use crate::models::Role;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single chat message sent to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Request body of `POST {base_url}/chat/completions`
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub stream: bool,
}

impl ChatRequest {
    /// Reject requests the provider would refuse anyway
    pub fn validate(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Err(AppError::Validation {
                message: "Chat request has no messages".to_string(),
                field: Some("messages".to_string()),
            });
        }
        if self.max_tokens == 0 {
            return Err(AppError::Validation {
                message: "max_tokens must be positive".to_string(),
                field: Some("max_tokens".to_string()),
            });
        }
        Ok(())
    }
}

/// Lazy sequence of content fragments; dropping it aborts the upstream request
pub type CompletionStream = BoxStream<'static, Result<String>>;

/// Trait for chat completion providers
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Generate a complete answer for the message sequence
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String>;

    /// Generate an answer as a stream of content fragments
    async fn stream_complete(&self, messages: Vec<ChatMessage>) -> Result<CompletionStream>;

    /// Minimal round trip proving the provider is reachable and authorised
    async fn ping(&self) -> Result<()>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create a completion client based on configuration
///
/// Without a credential the service still starts, answering from the mock
/// client so local runs work offline.
pub fn create_completion_client(config: &CompletionConfig) -> Result<Arc<dyn CompletionClient>> {
    match config.api_key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => Ok(Arc::new(OpenAiCompletionClient::new(config.clone())?)),
        _ => {
            tracing::warn!(
                base_url = %config.base_url,
                "No completion API key configured, using mock completion client"
            );
            Ok(Arc::new(MockCompletionClient::echo()))
        }
    }
}
