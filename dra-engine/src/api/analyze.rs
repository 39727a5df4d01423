//! Analysis endpoints

use crate::error::AnalysisError;
use crate::models::Report;
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub domain: String,
}

/// POST /api/v1/analyze_domain
///
/// **Request:** `{"domain": "example.com"}`
/// **Response:** the domain's [`Report`]
///
/// **Errors:**
/// - 400: malformed domain
/// - 429: no analysis slot within the admission timeout (`Retry-After` set)
/// - 503/504: archive unavailable or too slow
/// - 500: report could not be stored
pub async fn analyze_domain(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> ApiResult<Json<Report>> {
    let Json(payload) = payload?;
    let report = state.orchestrator.analyze(&payload.domain).await?;
    state.stats.invalidate();
    Ok(Json(Report::clone(&report)))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub domains: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchItemError {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

/// One batch entry: a full report, or the failure for that domain
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BatchItem {
    Completed(Report),
    Error { domain: String, error: BatchItemError },
}

impl BatchItem {
    fn from_outcome(domain: String, outcome: Result<std::sync::Arc<Report>, AnalysisError>) -> Self {
        match outcome {
            Ok(report) => BatchItem::Completed(Report::clone(&report)),
            Err(err) => BatchItem::Error {
                domain,
                error: BatchItemError {
                    code: err.code(),
                    message: err.to_string(),
                    retryable: err.is_retryable(),
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub data: Vec<BatchItem>,
}

/// POST /api/v1/batch_analyze
///
/// **Request:** `{"domains": ["a.com", "b.net"]}`
/// **Response:** `{"data": [...]}` in request order; each item carries
/// `status: "completed"` (report fields inline) or `status: "error"`.
///
/// Domains run concurrently under the same admission and de-duplication
/// rules as single requests. One domain failing does not fail the batch.
pub async fn batch_analyze(
    State(state): State<AppState>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> ApiResult<Json<BatchResponse>> {
    let Json(payload) = payload?;
    let max_batch = state.orchestrator.config().analysis.max_batch_size;
    if payload.domains.is_empty() {
        return Err(ApiError::BadRequest("domains must not be empty".to_string()));
    }
    if payload.domains.len() > max_batch {
        return Err(ApiError::BadRequest(format!(
            "batch of {} exceeds the limit of {}",
            payload.domains.len(),
            max_batch
        )));
    }

    let outcomes = state.orchestrator.analyze_batch(&payload.domains).await;
    let completed = outcomes.iter().filter(|(_, o)| o.is_ok()).count();
    info!(requested = outcomes.len(), completed, "Batch analysis finished");
    if completed > 0 {
        state.stats.invalidate();
    }

    let data = outcomes
        .into_iter()
        .map(|(domain, outcome)| BatchItem::from_outcome(domain, outcome))
        .collect();
    Ok(Json(BatchResponse { data }))
}

pub fn analyze_routes() -> Router<AppState> {
    Router::new()
        .route("/analyze_domain", post(analyze_domain))
        .route("/batch_analyze", post(batch_analyze))
}
