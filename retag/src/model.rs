//! Language model backends.
//!
//! Retagging only needs one operation from a model: turn a prompt into text.
//! Any backend implementing [`LanguageModel`] can be plugged in.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ModelError;

/// Instruction sent ahead of every prompt so the reply is bare JSON.
const JSON_ONLY_SYSTEM_PROMPT: &str = "You are a helpful assistant designed to output JSON. \
     ONLY output raw JSON. Do not emit markdown formatting.";

/// Reminder sent after the prompt.
const JSON_ONLY_REMINDER: &str =
    "Now respond with the JSON object only. ONLY output raw JSON. Do not emit markdown formatting.";

/// Trait for language model backends.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Get the name of this backend.
    fn name(&self) -> &str;

    /// Complete `prompt` and return the raw response text.
    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;

    /// Check if the backend is usable (API key set, etc.).
    fn is_available(&self) -> bool {
        true
    }
}

/// Chat completion backend for OpenAI-compatible APIs.
pub struct OpenAiChatModel {
    /// API key.
    api_key: Option<String>,

    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Model to request.
    model: String,
}

impl OpenAiChatModel {
    /// Create a new backend, reading the key from `OPENAI_API_KEY`.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
            model: "gpt-4o".to_string(),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

impl Default for OpenAiChatModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(ModelError::ProviderNotConfigured)?;

        debug!(
            "Requesting completion from {} ({} prompt bytes)",
            self.model,
            prompt.len()
        );

        let body = serde_json::json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": JSON_ONLY_SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
                { "role": "user", "content": JSON_ONLY_REMINDER },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);

            return Err(ModelError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ModelError::ApiRequest(format!("API error: {error_text}")));
        }

        let result: ChatCompletionResponse = response.json().await?;
        let content = result
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("No choices in response".to_string()))?
            .message
            .content
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }

        info!("Received {} bytes from {}", content.len(), result.model);
        Ok(content)
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Chat completion response format.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
