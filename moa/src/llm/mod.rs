//! LLM abstraction layer

mod embeddings;
mod error;
mod openai;

pub use embeddings::{EmbeddingClient, EmbeddingConfig};
pub use error::LlmError;
pub use openai::{OpenAiClient, OpenAiConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat-completion request against one model
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Trait for chat-completion backends
///
/// Implementations must be safe to call concurrently; the orchestrator fans
/// out every layer over a single shared backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send the request and return the generated text
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;
}
