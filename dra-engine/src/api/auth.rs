//! Login endpoint and bearer-token middleware

use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::header,
    middleware::Next,
    response::Response,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use dra_common::auth::{bearer_token, verify_password, AuthError, TokenValidator};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

/// POST /api/v1/login
///
/// **Request:** `{"username": "...", "password": "..."}`
/// **Response:** `{"access_token": "...", "token_type": "bearer"}`
///
/// **Errors:**
/// - 401 Unauthorized: unknown user or wrong password (indistinguishable)
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<LoginResponse>> {
    let Json(payload) = payload?;
    let user = dra_common::db::find_user(&state.db, &payload.username).await?;

    let valid = user.as_ref().is_some_and(|user| {
        verify_password(&payload.password, &user.password_salt, &user.password_hash)
    });
    if !valid {
        warn!(username = %payload.username, "Login rejected");
        return Err(ApiError::Unauthorized(AuthError::InvalidCredentials.to_string()));
    }

    info!(username = %payload.username, "Login succeeded");
    Ok(Json(LoginResponse {
        access_token: state.tokens.issue(&payload.username, Utc::now()),
        token_type: "bearer",
    }))
}

/// Reject requests without a valid `Authorization: Bearer` token
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized(AuthError::MissingToken.to_string()))?;

    let token = bearer_token(header_value).map_err(|e| ApiError::Unauthorized(e.to_string()))?;

    state.tokens.validate(token).map_err(|e| {
        warn!(error = %e, "Bearer token rejected");
        ApiError::Unauthorized(e.to_string())
    })?;

    Ok(next.run(request).await)
}

pub fn login_routes() -> Router<AppState> {
    Router::new().route("/login", post(login))
}
