//! dra-engine library interface
//!
//! Domain-history quality analysis: archive fetch, scoring, classification,
//! optional narrative, persistence and the HTTP API in front of them.

pub mod api;
pub mod archive;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod narrative;
pub mod orchestrator;
pub mod retry;
pub mod scoring;
pub mod stats;

pub use crate::error::{AnalysisError, ApiError, ApiResult};
pub use crate::orchestrator::AnalysisOrchestrator;

use axum::Router;
use chrono::{DateTime, Utc};
use dra_common::auth::SharedSecretTokens;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use stats::StatsAggregator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool (settings, users)
    pub db: SqlitePool,
    pub orchestrator: AnalysisOrchestrator,
    pub stats: Arc<StatsAggregator>,
    /// Issues tokens at login and validates bearer credentials
    pub tokens: SharedSecretTokens,
    /// TOML file that settings changes are mirrored to, when known
    pub config_path: Option<PathBuf>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        orchestrator: AnalysisOrchestrator,
        stats: Arc<StatsAggregator>,
        tokens: SharedSecretTokens,
    ) -> Self {
        Self {
            db,
            orchestrator,
            stats,
            tokens,
            config_path: None,
            startup_time: Utc::now(),
        }
    }

    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }
}

/// Build application router
///
/// `/health` and `POST /api/v1/login` are public; every other `/api/v1`
/// route requires a bearer token.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;

    let protected = Router::new()
        .merge(api::analyze_routes())
        .merge(api::report_routes())
        .merge(api::dashboard_routes())
        .merge(api::settings_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth::auth_middleware,
        ));

    let public = Router::new().merge(api::login_routes());

    Router::new()
        .nest("/api/v1", protected.merge(public))
        .merge(api::health_routes())
        .with_state(state)
}
