//! OpenAI-compatible chat completions (OpenAI, OpenRouter, local servers)

use super::{CompletionRequest, LanguageModelProvider, NarrativeError};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const LOCAL_BASE_URL: &str = "http://localhost:1234/v1";

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

pub struct OpenAiCompatibleProvider {
    name: &'static str,
    http_client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    fn build(
        name: &'static str,
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, NarrativeError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NarrativeError::Transport(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            name,
            http_client,
            endpoint: chat_endpoint(base_url),
            api_key,
        })
    }

    pub fn openai(
        base_url: Option<&str>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, NarrativeError> {
        Self::build("openai", base_url.unwrap_or(OPENAI_BASE_URL), api_key, timeout)
    }

    pub fn openrouter(
        base_url: Option<&str>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, NarrativeError> {
        Self::build(
            "openrouter",
            base_url.unwrap_or(OPENROUTER_BASE_URL),
            api_key,
            timeout,
        )
    }

    pub fn local(
        base_url: Option<&str>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, NarrativeError> {
        Self::build("local", base_url.unwrap_or(LOCAL_BASE_URL), api_key, timeout)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Resolve the chat completions endpoint from a base URL
fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{}/chat/completions", base)
    } else {
        format!("{}/v1/chat/completions", base)
    }
}

/// Extract `choices[0].message.content`
fn extract_content(json: &Value) -> Option<String> {
    json["choices"]
        .get(0)
        .and_then(|choice| choice["message"]["content"].as_str())
        .map(str::to_string)
}

#[async_trait]
impl LanguageModelProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, NarrativeError> {
        let body = ChatBody {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let mut req = self.http_client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
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
            message: format!("Failed to parse completion JSON: {}", e),
        })?;

        extract_content(&json).ok_or(NarrativeError::EmptyResponse)
    }
}
