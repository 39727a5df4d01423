//! dra-engine - DropAnalyzer analysis service
//!
//! Serves the dashboard's `/api/v1` endpoints: domain analysis, report
//! listing, dashboard rollups and settings.

use anyhow::{anyhow, Result};
use axum::http::HeaderValue;
use clap::Parser;
use dra_common::auth::{generate_salt, hash_password, load_shared_secret, SharedSecretTokens};
use dra_common::config::{resolve_config_path, CONFIG_ENV_VAR};
use dra_engine::archive::WaybackClient;
use dra_engine::cache::ResultCache;
use dra_engine::config::{AuthConfig, EngineConfig};
use dra_engine::db::settings::load_engine_config;
use dra_engine::db::{ReportStore, SqliteReportStore};
use dra_engine::narrative::NarrativeSynthesizer;
use dra_engine::stats::StatsAggregator;
use dra_engine::{build_router, AnalysisOrchestrator, AppState};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dra-engine", version, about = "DropAnalyzer domain-history analysis engine")]
struct Args {
    /// Config file (overrides DRA_CONFIG and the platform default)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:5000
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// SQLite database file
    #[arg(long, value_name = "PATH")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read before tracing starts because it carries the log level
    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR);
    let mut config = EngineConfig::load(config_path.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(database) = args.database {
        config.server.database_path = Some(database);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "Starting DropAnalyzer engine (dra-engine) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config file found, using defaults and environment"),
    }

    let db_path = config.server.resolved_database_path();
    info!("Database: {}", db_path.display());
    let pool = dra_engine::db::init_database_pool(&db_path).await?;

    // Settings saved through the API win for tunables; startup-only
    // sections still come from file, environment and flags
    if let Some(mut persisted) = load_engine_config(&pool).await? {
        // The settings row never holds the API key
        persisted.llm.api_key = config.llm.api_key.clone();
        persisted.server = config.server.clone();
        persisted.auth = config.auth.clone();
        persisted.analysis.max_concurrent_analysis = config.analysis.max_concurrent_analysis;
        persisted.logging = config.logging.clone();
        persisted.validate()?;
        config = persisted;
        info!("Applied settings saved via the settings API");
    }

    seed_admin(&pool, &config.auth).await?;

    let secret = load_shared_secret(&pool)
        .await
        .map_err(|e| anyhow!("Failed to load shared secret: {}", e))?;
    let tokens = SharedSecretTokens::new(secret, chrono::Duration::hours(config.auth.token_ttl_hours));

    let source = Arc::new(
        WaybackClient::new(&config.archive)
            .map_err(|e| anyhow!("Failed to create archive client: {}", e))?,
    );

    let narrator = match NarrativeSynthesizer::from_config(&config.llm, &config.retry) {
        Ok(narrator) => narrator,
        Err(e) => {
            warn!("Narrative synthesis disabled: {}", e);
            NarrativeSynthesizer::disabled()
        }
    };
    info!(
        enabled = narrator.is_enabled(),
        provider = ?config.llm.provider,
        model = %config.llm.model,
        "Narrative synthesizer ready"
    );

    let shutdown = CancellationToken::new();

    let cache = Arc::new(ResultCache::new());
    let sweeper = cache.clone().spawn_sweeper(
        Duration::from_millis(config.analysis.cache_sweep_interval_ms),
        shutdown.clone(),
    );

    let store: Arc<dyn ReportStore> = Arc::new(SqliteReportStore::new(pool.clone()));
    let stats = Arc::new(StatsAggregator::new(
        store.clone(),
        Duration::from_millis(config.analysis.stats_cache_ttl_ms),
    ));

    let bind_address = config.server.bind_address.clone();
    let cors = cors_layer(&config.server.cors_origins);
    info!(
        max_concurrent = config.analysis.max_concurrent_analysis,
        analysis_timeout_ms = config.analysis.analysis_timeout_ms,
        retry_attempts = config.retry.retry_attempts,
        "Analysis orchestrator ready"
    );

    let orchestrator =
        AnalysisOrchestrator::new(config, source, narrator, store, cache, shutdown.clone());
    let state = AppState::new(pool, orchestrator, stats, tokens).with_config_path(config_path);
    let app = build_router(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Listening on http://{}", bind_address);
    info!("Health check: http://{}/health", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!("Cache sweeper ended abnormally: {}", e);
    }
    info!("dra-engine stopped");

    Ok(())
}

/// Create the configured admin account when no users exist
async fn seed_admin(pool: &SqlitePool, auth: &AuthConfig) -> Result<()> {
    if dra_common::db::count_users(pool).await? > 0 {
        return Ok(());
    }

    match auth.admin_password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) => {
            let salt = generate_salt();
            let hash = hash_password(password, &salt)
                .map_err(|e| anyhow!("Failed to hash admin password: {}", e))?;
            dra_common::db::insert_user(pool, &auth.admin_username, &hash, &salt).await?;
            info!(username = %auth.admin_username, "Created initial admin account");
        }
        None => warn!(
            "No users exist and auth.admin_password is unset; login is unavailable until it is configured"
        ),
    }
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Resolve on ctrl-c (or when something else cancels `shutdown`)
async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for shutdown signal: {}", e);
                shutdown.cancelled().await;
            }
            info!("Shutdown requested, cancelling in-flight analyses");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }
}
