//! OpenAI-compatible chat-completions transport

use super::{ChatMessage, ProviderClient, ProviderFailure, ProviderReply, TokenUsage};
use crate::config::Config;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    reasoning: ReasoningOptions,
}

#[derive(Debug, Serialize)]
struct ReasoningOptions {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_details: Option<Value>,
}

/// Chat-completions client for OpenRouter (or any compatible endpoint)
pub struct OpenRouterClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    reasoning: bool,
}

impl OpenRouterClient {
    /// Build from config; the API key is read from the configured env var.
    pub fn from_config(config: &Config) -> crate::error::Result<Self> {
        let timeout = Duration::from_secs(config.provider.timeout_secs);
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config.provider.base_url.trim_end_matches('/').to_string(),
            api_key: config.provider_api_key(),
            reasoning: config.provider.reasoning,
        })
    }

    /// Build directly with a base URL and key (tests, embedding callers).
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            reasoning: true,
        }
    }
}

#[async_trait]
impl ProviderClient for OpenRouterClient {
    async fn send(
        &self,
        messages: &[ChatMessage],
        model: &str,
    ) -> std::result::Result<ProviderReply, ProviderFailure> {
        let api_key = self.api_key.as_deref().ok_or(ProviderFailure::MissingApiKey)?;

        let request = CompletionRequest {
            model,
            messages,
            reasoning: ReasoningOptions {
                enabled: self.reasoning,
            },
        };

        debug!("Sending {} messages to model {}", messages.len(), model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderFailure::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderFailure::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderFailure::Malformed(e.to_string()))?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .unwrap_or_default();

        Ok(ProviderReply {
            content: message.content.unwrap_or_default(),
            usage: parsed.usage.unwrap_or_default(),
            reasoning_details: message.reasoning_details,
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            response_id: parsed.id.unwrap_or_default(),
        })
    }
}
