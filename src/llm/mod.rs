//! LLM client module.
//!
//! A minimal chat-completion abstraction used by the semantic complexity
//! refiner, with OpenRouter as the implementation. Retries and circuit
//! breaking are applied by callers through [`crate::resilience`].

mod error;
mod openrouter;

pub use error::{classify_http_status, LlmError, LlmErrorKind};
pub use openrouter::OpenRouterClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
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

/// Response from a chat completion.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Text content of the first choice
    pub content: Option<String>,
    /// Model that actually served the request
    pub model: Option<String>,
}

/// Trait for LLM chat-completion providers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one chat completion request (no retries).
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatResponse, LlmError>;
}
