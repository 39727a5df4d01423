//! Anthropic Messages API provider

use super::{CompletionRequest, LanguageModelProvider, NarrativeError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(
        base_url: Option<&str>,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, NarrativeError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NarrativeError::Transport(format!("HTTP client build failed: {}", e)))?;

        let base = base_url.unwrap_or(ANTHROPIC_BASE_URL).trim_end_matches('/');
        let endpoint = if base.ends_with("/v1/messages") {
            base.to_string()
        } else {
            format!("{}/v1/messages", base.trim_end_matches("/v1"))
        };

        Ok(Self {
            http_client,
            endpoint,
            api_key,
        })
    }
}

/// Model ids from OpenRouter carry a vendor prefix ("anthropic/claude-...")
fn model_id(model: &str) -> &str {
    model.strip_prefix("anthropic/").unwrap_or(model)
}

/// Concatenate the text blocks of a Messages API response
fn extract_text(json: &Value) -> Option<String> {
    let text: String = json["content"]
        .as_array()?
        .iter()
        .filter(|block| block["type"] == "text")
        .filter_map(|block| block["text"].as_str())
        .collect();
    (!text.is_empty()).then_some(text)
}

#[async_trait]
impl LanguageModelProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, NarrativeError> {
        let body = json!({
            "model": model_id(&request.model),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature.min(1.0),
            "system": request.system_prompt,
            "messages": [{"role": "user", "content": request.user_prompt}],
        });

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| NarrativeError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| NarrativeError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(NarrativeError::from_status(status, &text));
        }

        let json: Value = serde_json::from_str(&text).map_err(|e| NarrativeError::Provider {
            status: Some(status.as_u16()),
            message: format!("Failed to parse messages JSON: {}", e),
        })?;

        extract_text(&json).ok_or(NarrativeError::EmptyResponse)
    }
}
