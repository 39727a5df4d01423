//! Settings endpoints
//!
//! GET returns the active configuration with secrets redacted. PUT replaces
//! the tunable configuration for subsequent analyses.

use crate::config::{EngineConfig, REDACTED};
use crate::narrative::NarrativeSynthesizer;
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::get,
    Json, Router,
};
use std::path::Path;
use tracing::{info, warn};

/// GET /api/v1/settings
pub async fn get_settings(State(state): State<AppState>) -> Json<EngineConfig> {
    Json(state.orchestrator.config().redacted())
}

/// PUT /api/v1/settings
///
/// **Request:** a full [`EngineConfig`] document (missing sections take
/// defaults). `server` and `auth` are startup-only and keep their current
/// values, as does `analysis.max_concurrent_analysis`. An `llm.api_key` of
/// `"********"` keeps the current key.
///
/// **Behavior:**
/// 1. Validate (400 on rejection)
/// 2. Write to database (authoritative)
/// 3. Swap into the orchestrator
/// 4. Mirror to the TOML file (best-effort)
///
/// Neither persisted copy gains a secret: the database row omits the API key
/// and admin password, and the TOML file keeps whatever secrets it already
/// held.
pub async fn put_settings(
    State(state): State<AppState>,
    payload: Result<Json<EngineConfig>, JsonRejection>,
) -> ApiResult<Json<EngineConfig>> {
    let Json(mut payload) = payload?;
    let current = state.orchestrator.config();

    payload.server = current.server.clone();
    payload.auth = current.auth.clone();
    payload.analysis.max_concurrent_analysis = current.analysis.max_concurrent_analysis;
    if payload.llm.api_key.as_deref() == Some(REDACTED) {
        payload.llm.api_key = current.llm.api_key.clone();
    }

    payload
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let narrator = NarrativeSynthesizer::from_config(&payload.llm, &payload.retry)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let persisted = payload.without_secrets();
    crate::db::settings::save_engine_config(&state.db, &persisted)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to save settings to database: {}", e)))?;

    state.orchestrator.update_config(payload.clone(), narrator);
    info!(
        provider = ?payload.llm.provider,
        llm_enabled = payload.llm.enabled,
        "Settings updated via API"
    );

    if let Some(path) = &state.config_path {
        match mirror_to_toml(persisted, path) {
            Ok(()) => info!("Settings synced to TOML: {}", path.display()),
            Err(e) => warn!("TOML sync failed (database write succeeded): {}", e),
        }
    }

    Ok(Json(payload.redacted()))
}

/// Write `config` to `path`, carrying over the secrets already in the file
fn mirror_to_toml(mut config: EngineConfig, path: &Path) -> dra_common::Result<()> {
    if path.exists() {
        let on_disk: EngineConfig = dra_common::config::load_toml_config(Some(path))?;
        config.llm.api_key = on_disk.llm.api_key;
        config.auth.admin_password = on_disk.auth.admin_password;
    }
    dra_common::config::write_toml_config(&config, path)
}

pub fn settings_routes() -> Router<AppState> {
    Router::new().route("/settings", get(get_settings).put(put_settings))
}
