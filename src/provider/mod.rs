//! Model-provider collaborator
//!
//! Chat message and reply types, a typed failure enum, and the
//! [`ProviderClient`] seam. One concrete implementation per supported
//! transport, chosen by configuration at startup; currently the
//! OpenAI-compatible chat-completions transport used by OpenRouter.

mod openrouter;

pub use openrouter::OpenRouterClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role in a provider conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message in the ordered list sent to a provider
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

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Structured provider response
#[derive(Debug, Clone)]
pub struct ProviderReply {
    /// Response text (may be empty; the orchestrator classifies that)
    pub content: String,

    /// Token usage, zeroed when the provider omits it
    pub usage: TokenUsage,

    /// Provider reasoning metadata, passed through opaquely
    pub reasoning_details: Option<Value>,

    /// Model id the provider actually served
    pub model: String,

    /// Provider-assigned response id
    pub response_id: String,
}

/// Typed provider failure.
///
/// Classification into attempt outcomes is a pure function of this value
/// (see the orchestrator); the transport only records what happened.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderFailure {
    #[error("Provider API key is not configured")]
    MissingApiKey,

    #[error("Provider returned error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Provider transport error: {0}")]
    Transport(String),

    #[error("Provider response was malformed: {0}")]
    Malformed(String),
}

/// Model-provider collaborator seam
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Send an ordered message list to one model, returning the structured
    /// reply or a typed failure.
    async fn send(
        &self,
        messages: &[ChatMessage],
        model: &str,
    ) -> std::result::Result<ProviderReply, ProviderFailure>;
}
