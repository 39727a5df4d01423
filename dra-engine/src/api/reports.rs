//! Report listing, lookup and cache invalidation

use crate::models::{Report, ReportFilter};
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{Path, Query, State},
    routing::{delete, get},
    Json, Router,
};
use dra_common::normalize_domain;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct ReportsQuery {
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReportsResponse {
    pub data: Vec<Report>,
}

/// GET /api/v1/reports?filter=all|recommended|low_quality&search=term
///
/// Reads the store directly (never the cache); ordered by domain.
pub async fn list_reports(
    State(state): State<AppState>,
    Query(query): Query<ReportsQuery>,
) -> ApiResult<Json<ReportsResponse>> {
    let filter: ReportFilter = query
        .filter
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(ApiError::BadRequest)?;
    let search = query.search.unwrap_or_default();

    let data = state.orchestrator.store().list(filter, &search).await?;
    Ok(Json(ReportsResponse { data }))
}

/// GET /api/v1/report/:domain
pub async fn get_report(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> ApiResult<Json<Report>> {
    let key = normalize_domain(&domain)?;
    state
        .orchestrator
        .store()
        .get(&key)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No report for {}", key)))
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub domain: String,
    pub invalidated: bool,
}

/// DELETE /api/v1/report/:domain/cache
///
/// Forces the next analysis of the domain to recompute. The stored report
/// is kept.
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> ApiResult<Json<InvalidateResponse>> {
    let invalidated = state.orchestrator.invalidate(&domain)?;
    Ok(Json(InvalidateResponse {
        domain: normalize_domain(&domain)?,
        invalidated,
    }))
}

pub fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/reports", get(list_reports))
        .route("/report/:domain", get(get_report))
        .route("/report/:domain/cache", delete(invalidate_cache))
}
