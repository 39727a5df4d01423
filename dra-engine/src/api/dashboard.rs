//! Dashboard rollup endpoint

use crate::models::DashboardStats;
use crate::{ApiResult, AppState};
use axum::{extract::State, routing::get, Json, Router};

/// GET /api/v1/dashboard
pub async fn dashboard(State(state): State<AppState>) -> ApiResult<Json<DashboardStats>> {
    Ok(Json(state.stats.dashboard().await?))
}

pub fn dashboard_routes() -> Router<AppState> {
    Router::new().route("/dashboard", get(dashboard))
}
