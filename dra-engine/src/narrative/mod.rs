//! Narrative synthesis
//!
//! Optional language-model call that turns [`QualityMetrics`] into a short
//! human-readable assessment. Providers sit behind [`LanguageModelProvider`];
//! [`build_provider`] selects one from [`LlmConfig`].
//!
//! Synthesis is best-effort. The orchestrator records any failure as
//! `narrative_status = unavailable` and never fails the analysis over it.

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiCompatibleProvider;

use crate::config::{LlmConfig, ProviderKind, RetryConfig};
use crate::models::QualityMetrics;
use crate::retry::{RetryClass, RetryPolicy, Retryable};
use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Narrative failures (never surfaced to API callers)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NarrativeError {
    #[error("Narrative synthesis disabled")]
    Disabled,

    #[error("Provider transport error: {0}")]
    Transport(String),

    #[error("Provider rate limit: {0}")]
    RateLimited(String),

    /// Non-success response or unusable configuration (`status` None)
    #[error("Provider error{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Provider { status: Option<u16>, message: String },

    #[error("Provider returned no text")]
    EmptyResponse,

    #[error("Narrative timed out after {0:?}")]
    TimedOut(Duration),
}

impl NarrativeError {
    /// Map an HTTP error status with its response body
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message: String = body.chars().take(200).collect();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            NarrativeError::RateLimited(message)
        } else {
            NarrativeError::Provider {
                status: Some(status.as_u16()),
                message,
            }
        }
    }
}

impl Retryable for NarrativeError {
    fn retry_class(&self) -> RetryClass {
        match self {
            NarrativeError::Transport(_) | NarrativeError::TimedOut(_) => RetryClass::Transient,
            NarrativeError::RateLimited(_) => RetryClass::RateLimited,
            NarrativeError::Provider {
                status: Some(status),
                ..
            } if *status >= 500 => RetryClass::Transient,
            _ => RetryClass::Fatal,
        }
    }

    fn attempt_timed_out(after: Duration) -> Self {
        NarrativeError::TimedOut(after)
    }
}

/// One completion request
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Text completion backend
#[async_trait]
pub trait LanguageModelProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, NarrativeError>;
}

/// Build the provider selected by `config`, or `None` when disabled
pub fn build_provider(
    config: &LlmConfig,
) -> Result<Option<Arc<dyn LanguageModelProvider>>, NarrativeError> {
    if !config.enabled {
        return Ok(None);
    }

    let api_key = config.api_key.clone().filter(|k| !k.trim().is_empty());
    if api_key.is_none() && config.provider != ProviderKind::Local {
        return Err(NarrativeError::Provider {
            status: None,
            message: format!("llm.api_key is required for provider {:?}", config.provider),
        });
    }

    let timeout = Duration::from_millis(config.timeout_ms);
    let base_url = config.base_url.as_deref();

    let provider: Arc<dyn LanguageModelProvider> = match config.provider {
        ProviderKind::OpenRouter => {
            Arc::new(OpenAiCompatibleProvider::openrouter(base_url, api_key, timeout)?)
        }
        ProviderKind::OpenAi => {
            Arc::new(OpenAiCompatibleProvider::openai(base_url, api_key, timeout)?)
        }
        ProviderKind::Local => {
            Arc::new(OpenAiCompatibleProvider::local(base_url, api_key, timeout)?)
        }
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
            base_url,
            api_key.unwrap_or_default(),
            timeout,
        )?),
    };

    Ok(Some(provider))
}

/// Produces narratives with the configured provider, prompt and retry budget
pub struct NarrativeSynthesizer {
    provider: Option<Arc<dyn LanguageModelProvider>>,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
    retry: RetryPolicy,
    /// Bound on one whole `synthesize` call
    deadline: Duration,
}

impl NarrativeSynthesizer {
    pub fn new(
        provider: Option<Arc<dyn LanguageModelProvider>>,
        config: &LlmConfig,
        retry: &RetryConfig,
    ) -> Self {
        let retry = RetryPolicy::from_config(retry, Duration::from_millis(config.timeout_ms))
            .with_attempts(config.retry_attempts);
        Self {
            provider,
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            retry,
            deadline: Duration::from_millis(config.narrative_timeout_ms),
        }
    }

    /// Synthesizer that never calls out
    pub fn disabled() -> Self {
        Self::new(None, &LlmConfig::default(), &RetryConfig::default())
    }

    /// Build provider and synthesizer from configuration
    pub fn from_config(config: &LlmConfig, retry: &RetryConfig) -> Result<Self, NarrativeError> {
        Ok(Self::new(build_provider(config)?, config, retry))
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Generate a narrative for `domain`
    ///
    /// Every attempt and retry delay together stay within
    /// `llm.narrative_timeout_ms`; past it the call fails with `TimedOut`.
    pub async fn synthesize(
        &self,
        domain: &str,
        metrics: &QualityMetrics,
    ) -> Result<String, NarrativeError> {
        let provider = self.provider.as_ref().ok_or(NarrativeError::Disabled)?;

        let request = CompletionRequest {
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
            user_prompt: build_prompt(domain, metrics),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let attempts = self
            .retry
            .run(provider.name(), || provider.complete(&request));
        let text = tokio::time::timeout(self.deadline, attempts)
            .await
            .map_err(|_| NarrativeError::TimedOut(self.deadline))??;

        let text = text.trim();
        if text.is_empty() {
            return Err(NarrativeError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}

/// User prompt summarizing the metrics
pub fn build_prompt(domain: &str, metrics: &QualityMetrics) -> String {
    let mut prompt = format!("Domain: {}\n", domain);
    let _ = writeln!(prompt, "Total archive captures: {}", metrics.total_snapshots);
    let _ = writeln!(prompt, "Calendar years with captures: {}", metrics.years_covered);
    if let Some(first) = metrics.first_snapshot {
        let _ = writeln!(prompt, "First capture: {}", first.format("%Y-%m-%d"));
    }
    if let Some(last) = metrics.last_snapshot {
        let _ = writeln!(prompt, "Last capture: {}", last.format("%Y-%m-%d"));
    }
    if let Some(gap) = metrics.max_gap_days {
        let _ = writeln!(prompt, "Longest gap between captures: {} days", gap);
    }
    let _ = writeln!(prompt, "Distinct content versions: {}", metrics.unique_versions);
    if !metrics.snapshots_per_year.is_empty() {
        let per_year: Vec<String> = metrics
            .snapshots_per_year
            .iter()
            .map(|(year, count)| format!("{}: {}", year, count))
            .collect();
        let _ = writeln!(prompt, "Captures per year: {}", per_year.join(", "));
    }
    let _ = writeln!(prompt, "Quality score (0-100): {:.1}", metrics.score);
    prompt.push_str("\nAssess the domain's history and suggest how it could be reused.");
    prompt
}
