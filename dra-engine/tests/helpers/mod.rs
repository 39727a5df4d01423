//! Test doubles and builders shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use dra_common::auth::{generate_salt, hash_password, SharedSecretTokens};
use dra_engine::archive::{SnapshotSource, SourceError};
use dra_engine::cache::ResultCache;
use dra_engine::config::EngineConfig;
use dra_engine::db::{ReportStore, SqliteReportStore};
use dra_engine::models::{Snapshot, SnapshotTimeline};
use dra_engine::narrative::{
    CompletionRequest, LanguageModelProvider, NarrativeError, NarrativeSynthesizer,
};
use dra_engine::stats::StatsAggregator;
use dra_engine::{build_router, AnalysisOrchestrator, AppState};
use http_body_util::BodyExt;
use sqlx::SqlitePool;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Config with short delays so retry paths finish quickly
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.analysis.analysis_timeout_ms = 5_000;
    config.analysis.admission_timeout_ms = 5_000;
    config.archive.wayback_machine_timeout_ms = 2_000;
    config.archive.cdx_api_timeout_ms = 1_000;
    config.retry.retry_attempts = 3;
    config.retry.retry_delay_ms = 20;
    config.retry.rate_limit_delay_ms = 10;
    config.llm.retry_attempts = 1;
    config
}

/// One capture per year for `first..=last`, each with distinct content
pub fn yearly_snapshots(first: i32, last: i32) -> Vec<Snapshot> {
    (first..=last)
        .map(|year| Snapshot {
            captured_at: Utc.with_ymd_and_hms(year, 6, 1, 12, 0, 0).unwrap(),
            status_code: Some(200),
            digest: Some(format!("DIGEST{}", year)),
        })
        .collect()
}

/// Decrements the active counter even when the fetch future is dropped
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scripted snapshot source
pub struct FakeSource {
    snapshots: Vec<Snapshot>,
    delay: Duration,
    script: Mutex<VecDeque<SourceError>>,
    rejected: Mutex<HashSet<String>>,
    availability: Result<Option<DateTime<Utc>>, SourceError>,
    timemap: Result<Option<u64>, SourceError>,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeSource {
    pub fn new(snapshots: Vec<Snapshot>) -> Self {
        Self {
            snapshots,
            delay: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            rejected: Mutex::new(HashSet::new()),
            availability: Ok(None),
            timemap: Ok(None),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next calls with these errors, in order
    pub fn failing_with(self, errors: Vec<SourceError>) -> Self {
        self.script.lock().unwrap().extend(errors);
        self
    }

    /// Always answer `InvalidInput` for `domain`
    pub fn rejecting(self, domain: &str) -> Self {
        self.rejected.lock().unwrap().insert(domain.to_string());
        self
    }

    /// Answer for the availability lookup
    pub fn with_availability(mut self, answer: Result<Option<DateTime<Utc>>, SourceError>) -> Self {
        self.availability = answer;
        self
    }

    /// Answer for the timemap lookup
    pub fn with_timemap(mut self, answer: Result<Option<u64>, SourceError>) -> Self {
        self.timemap = answer;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of fetches observed running at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for FakeSource {
    fn name(&self) -> &'static str {
        "fake archive"
    }

    async fn fetch(
        &self,
        domain: &str,
        _request_timeout: Duration,
    ) -> Result<SnapshotTimeline, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        let _active = ActiveGuard(&self.active);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.rejected.lock().unwrap().contains(domain) {
            return Err(SourceError::InvalidInput(domain.to_string()));
        }
        if let Some(err) = self.script.lock().unwrap().pop_front() {
            return Err(err);
        }

        Ok(SnapshotTimeline::new(domain, self.snapshots.clone()))
    }

    async fn closest_capture(
        &self,
        _domain: &str,
        _request_timeout: Duration,
    ) -> Result<Option<DateTime<Utc>>, SourceError> {
        self.availability.clone()
    }

    async fn timemap_count(
        &self,
        _domain: &str,
        _request_timeout: Duration,
    ) -> Result<Option<u64>, SourceError> {
        self.timemap.clone()
    }
}

/// Language model double
pub struct FakeProvider {
    reply: Result<String, NarrativeError>,
    calls: AtomicUsize,
}

impl FakeProvider {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Err(NarrativeError::Provider {
                status: None,
                message: "model refused".to_string(),
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModelProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake model"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, NarrativeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone()
    }
}

/// Everything a pipeline test inspects
pub struct Harness {
    pub orchestrator: AnalysisOrchestrator,
    pub source: Arc<FakeSource>,
    pub provider: Option<Arc<FakeProvider>>,
    pub pool: SqlitePool,
    pub store: Arc<dyn ReportStore>,
    pub shutdown: CancellationToken,
    pub tokens: SharedSecretTokens,
}

pub async fn harness(
    config: EngineConfig,
    source: FakeSource,
    provider: Option<FakeProvider>,
) -> Harness {
    let pool = dra_engine::db::init_in_memory_pool()
        .await
        .expect("Failed to create in-memory database");

    let source = Arc::new(source);
    let provider = provider.map(Arc::new);
    let narrator = NarrativeSynthesizer::new(
        provider
            .clone()
            .map(|p| p as Arc<dyn LanguageModelProvider>),
        &config.llm,
        &config.retry,
    );

    let store: Arc<dyn ReportStore> = Arc::new(SqliteReportStore::new(pool.clone()));
    let shutdown = CancellationToken::new();
    let orchestrator = AnalysisOrchestrator::new(
        config,
        source.clone(),
        narrator,
        store.clone(),
        Arc::new(ResultCache::new()),
        shutdown.clone(),
    );

    Harness {
        orchestrator,
        source,
        provider,
        pool,
        store,
        shutdown,
        tokens: SharedSecretTokens::new("test-secret", chrono::Duration::hours(1)),
    }
}

pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASSWORD: &str = "correct horse";

impl Harness {
    /// Router over this harness with a seeded admin account
    pub async fn app(&self, config_path: Option<PathBuf>) -> Router {
        let salt = generate_salt();
        dra_common::db::insert_user(
            &self.pool,
            ADMIN_USER,
            &hash_password(ADMIN_PASSWORD, &salt).unwrap(),
            &salt,
        )
        .await
        .expect("Failed to seed admin user");

        let stats = Arc::new(StatsAggregator::new(self.store.clone(), Duration::ZERO));
        let state = AppState::new(
            self.pool.clone(),
            self.orchestrator.clone(),
            stats,
            self.tokens.clone(),
        )
        .with_config_path(config_path);
        build_router(state)
    }

    /// `Authorization` header value for the admin account
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.tokens.issue(ADMIN_USER, Utc::now()))
    }
}

/// Authenticated JSON request
pub fn authed(
    method: &str,
    uri: &str,
    bearer: &str,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, bearer);
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
