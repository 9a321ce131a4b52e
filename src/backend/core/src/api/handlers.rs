//! Request handlers.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::auth::TokenPair;
use crate::error::GateError;
use crate::middleware::CurrentUser;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailQuery {
    pub token: String,
}

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenPair>, GateError> {
    let pair = state.sessions.login(&body.email, &body.password).await?;
    Ok(Json(pair))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<impl IntoResponse, GateError> {
    let access_token = state.sessions.refresh(&body.refresh_token).await?;
    Ok(Json(serde_json::json!({ "access_token": access_token })))
}

/// The session layer has already verified the access token; it is read
/// back from the header here so it can be blacklisted.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RefreshRequest>,
) -> Result<impl IntoResponse, GateError> {
    let access_token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| GateError::unauthenticated("Access denied. No token provided."))?;

    state
        .sessions
        .logout(access_token, &body.refresh_token)
        .await?;

    Ok(Json(serde_json::json!({ "message": "Logged out successfully." })))
}

pub async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<impl IntoResponse, GateError> {
    state.sessions.verify_email(&query.token).await?;
    Ok(Json(serde_json::json!({ "message": "Email verified." })))
}

pub async fn me(user: CurrentUser) -> impl IntoResponse {
    Json(serde_json::json!({ "id": user.id, "role": user.role.as_str() }))
}
