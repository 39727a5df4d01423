//! Engine configuration
//!
//! One immutable [`EngineConfig`] is injected into the orchestrator at
//! construction. Runtime changes build a new config and swap it in whole.
//!
//! **Priority:** CLI flags → ENV → TOML file → compiled defaults
//!
//! Every knob exposed by the dashboard's settings screen maps 1:1 onto a
//! field here (`analysisTimeout` → `analysis.analysis_timeout_ms`, ...).

use dra_common::time::millis_to_duration;
use dra_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides database path
pub const DATABASE_ENV_VAR: &str = "DRA_DATABASE_PATH";
/// Overrides bind address
pub const BIND_ENV_VAR: &str = "DRA_BIND_ADDRESS";
/// Language model API key (wins over the TOML value)
pub const LLM_KEY_ENV_VAR: &str = "DRA_LLM_API_KEY";
/// Placeholder shown in place of secrets
pub const REDACTED: &str = "********";
/// Upper bound on `scoring.count_saturation`
pub const MAX_COUNT_SATURATION: u64 = 10_000_000;

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub analysis: AnalysisConfig,
    pub archive: ArchiveConfig,
    pub retry: RetryConfig,
    pub scoring: ScoringConfig,
    pub llm: LlmConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// None → `<data dir>/dropanalyzer/dropanalyzer.db`
    pub database_path: Option<PathBuf>,
    /// Allowed CORS origins; empty disables cross-origin access
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5000".to_string(),
            database_path: None,
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| dra_common::config::default_data_dir().join("dropanalyzer.db"))
    }
}

/// Orchestrator knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Bound on the whole (retried) archive fetch
    pub analysis_timeout_ms: u64,
    /// Global ceiling on concurrently running pipelines (fixed at startup)
    pub max_concurrent_analysis: usize,
    /// How long a request may queue for a slot before `Overloaded`
    pub admission_timeout_ms: u64,
    /// Result cache TTL
    pub cache_expiration_ms: u64,
    pub cache_sweep_interval_ms: u64,
    /// Dashboard rollup cache TTL; 0 recomputes on every query
    pub stats_cache_ttl_ms: u64,
    pub max_batch_size: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            analysis_timeout_ms: 30_000,
            max_concurrent_analysis: 5,
            admission_timeout_ms: 60_000,
            cache_expiration_ms: 24 * 60 * 60 * 1000,
            cache_sweep_interval_ms: 5 * 60 * 1000,
            stats_cache_ttl_ms: 0,
            max_batch_size: 50,
        }
    }
}

impl AnalysisConfig {
    pub fn analysis_timeout(&self) -> Duration {
        millis_to_duration(self.analysis_timeout_ms)
    }

    pub fn admission_timeout(&self) -> Duration {
        millis_to_duration(self.admission_timeout_ms)
    }

    pub fn cache_expiration(&self) -> Duration {
        millis_to_duration(self.cache_expiration_ms)
    }
}

/// Wayback CDX client knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub cdx_endpoint: String,
    /// Bound on one fetch attempt (every page of it); also the client ceiling
    pub wayback_machine_timeout_ms: u64,
    /// Bound on a single CDX page request
    pub cdx_api_timeout_ms: u64,
    pub page_size: usize,
    pub max_records: usize,
    pub requests_per_second: u32,
    pub user_agent: String,
    /// Also query the availability API and the timemap for each domain
    pub extended_metrics: bool,
    pub availability_endpoint: String,
    /// Link-format timemap; the domain is appended to this prefix
    pub timemap_endpoint: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            cdx_endpoint: "https://web.archive.org/cdx/search/cdx".to_string(),
            wayback_machine_timeout_ms: 15_000,
            cdx_api_timeout_ms: 10_000,
            page_size: 1000,
            max_records: 50_000,
            requests_per_second: 5,
            user_agent: format!("DropAnalyzer/{}", env!("CARGO_PKG_VERSION")),
            extended_metrics: false,
            availability_endpoint: "https://archive.org/wayback/available".to_string(),
            timemap_endpoint: "https://web.archive.org/web/timemap/link/".to_string(),
        }
    }
}

/// Delay growth between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Extra pause after a rate-limit-class failure
    pub rate_limit_delay_ms: u64,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_ms: 2000,
            rate_limit_delay_ms: 1000,
            backoff: Backoff::Fixed,
        }
    }
}

/// Optional finer-grained label applied when `score >= min_score`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierBand {
    pub label: String,
    pub min_score: f64,
}

/// Scoring weights and classification thresholds (0-100 scale)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub recommend_threshold: f64,
    pub good_threshold: f64,
    pub count_weight: f64,
    pub span_weight: f64,
    pub recency_weight: f64,
    /// Snapshot count at which the count component saturates
    pub count_saturation: u64,
    pub span_saturation_years: f64,
    /// Dormancy tolerated before recency decays
    pub dormancy_grace_years: f64,
    /// Dormancy (beyond grace) over which recency decays to zero
    pub dormancy_horizon_years: f64,
    pub bands: Vec<TierBand>,
    /// Domains flagged `long_live` on their reports (matched case-insensitively)
    pub long_live_domains: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            recommend_threshold: 50.0,
            good_threshold: 30.0,
            count_weight: 50.0,
            span_weight: 30.0,
            recency_weight: 20.0,
            count_saturation: 100,
            span_saturation_years: 10.0,
            dormancy_grace_years: 1.0,
            dormancy_horizon_years: 10.0,
            bands: Vec::new(),
            long_live_domains: Vec::new(),
        }
    }
}

impl ScoringConfig {
    /// Whether normalized `domain` is on the long-live list
    pub fn is_long_live(&self, domain: &str) -> bool {
        self.long_live_domains
            .iter()
            .any(|entry| entry.trim().eq_ignore_ascii_case(domain))
    }
}

/// Language model backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenRouter,
    OpenAi,
    Anthropic,
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: ProviderKind,
    pub model: String,
    /// 0-2
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
    /// Overrides the provider's default endpoint
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Bound on one provider call
    pub timeout_ms: u64,
    /// Bound on the whole narrative stage, retries and delays included
    pub narrative_timeout_ms: u64,
    pub retry_attempts: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: ProviderKind::OpenRouter,
            model: "anthropic/claude-3.5-sonnet".to_string(),
            temperature: 0.7,
            max_tokens: 4000,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            base_url: None,
            api_key: None,
            timeout_ms: 20_000,
            narrative_timeout_ms: 25_000,
            retry_attempts: 2,
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert in expired-domain evaluation. \
Given archival history metrics for a domain, assess its quality, history and potential. \
Consider the number and spread of Wayback Machine captures, periods of activity and \
dormancy, and content churn. Respond with a concise structured assessment and a \
recommendation on how the domain could be used.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token_ttl_hours: i64,
    /// Seed account created when the users table is empty
    pub admin_username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_hours: 24,
            admin_username: "admin".to_string(),
            admin_password: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from TOML (missing file → defaults), then apply ENV overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config: EngineConfig = dra_common::config::load_toml_config(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `DRA_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var(BIND_ENV_VAR) {
            if !bind.trim().is_empty() {
                self.server.bind_address = bind;
            }
        }
        if let Ok(path) = std::env::var(DATABASE_ENV_VAR) {
            if !path.trim().is_empty() {
                self.server.database_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(key) = std::env::var(LLM_KEY_ENV_VAR) {
            if !key.trim().is_empty() {
                self.llm.api_key = Some(key);
            }
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.analysis.max_concurrent_analysis == 0 {
            return Err(Error::Config(
                "analysis.max_concurrent_analysis must be at least 1".to_string(),
            ));
        }
        let timeouts = [
            ("analysis.analysis_timeout_ms", self.analysis.analysis_timeout_ms),
            ("archive.wayback_machine_timeout_ms", self.archive.wayback_machine_timeout_ms),
            ("archive.cdx_api_timeout_ms", self.archive.cdx_api_timeout_ms),
            ("llm.timeout_ms", self.llm.timeout_ms),
            ("llm.narrative_timeout_ms", self.llm.narrative_timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, ms)| *ms == 0) {
            return Err(Error::Config(format!("{} must be non-zero", name)));
        }
        if self.retry.retry_attempts == 0 {
            return Err(Error::Config(
                "retry.retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.archive.page_size == 0 || self.archive.requests_per_second == 0 {
            return Err(Error::Config(
                "archive.page_size and archive.requests_per_second must be non-zero".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(Error::Config(format!(
                "llm.temperature {} outside 0-2",
                self.llm.temperature
            )));
        }

        let s = &self.scoring;
        let non_negative = [
            ("recommend_threshold", s.recommend_threshold),
            ("good_threshold", s.good_threshold),
            ("count_weight", s.count_weight),
            ("span_weight", s.span_weight),
            ("recency_weight", s.recency_weight),
            ("dormancy_grace_years", s.dormancy_grace_years),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Config(format!(
                    "scoring.{} must be a non-negative number",
                    name
                )));
            }
        }
        if s.count_saturation == 0
            || !(s.span_saturation_years > 0.0)
            || !(s.dormancy_horizon_years > 0.0)
        {
            return Err(Error::Config(
                "scoring saturation and horizon values must be positive".to_string(),
            ));
        }
        if s.count_saturation > MAX_COUNT_SATURATION {
            return Err(Error::Config(format!(
                "scoring.count_saturation must not exceed {}",
                MAX_COUNT_SATURATION
            )));
        }
        if s.bands.iter().any(|b| !b.min_score.is_finite() || b.label.trim().is_empty()) {
            return Err(Error::Config(
                "scoring.bands need a label and a finite min_score".to_string(),
            ));
        }

        Ok(())
    }

    /// Copy safe to return over the API (secrets removed)
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.llm.api_key = copy.llm.api_key.as_ref().map(|_| REDACTED.to_string());
        copy.auth.admin_password = None;
        copy
    }

    /// Copy safe to write to disk; the API key only comes from file or ENV
    pub fn without_secrets(&self) -> Self {
        let mut copy = self.clone();
        copy.llm.api_key = None;
        copy.auth.admin_password = None;
        copy
    }
}
