//! REST handlers. Responses use the `{code, message?, data?}` envelope
//! with `code == 0` for success.

pub mod accounts;
pub mod auth;
pub mod cloud;
pub mod settings;
pub mod stream;
pub mod tasks;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::state::AppState;

pub(crate) type ApiError = (StatusCode, Json<Value>);
pub(crate) type ApiResult = Result<Json<Value>, ApiError>;

pub(crate) fn ok(data: impl Serialize) -> Json<Value> {
    Json(json!({ "code": 0, "data": data }))
}

pub(crate) fn ok_message(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "code": 0, "message": message.into() }))
}

pub(crate) fn fail(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "code": 1, "message": message.into() })))
}

// ============ Health ============

/// Health check response
#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_handler(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.uptime_secs(),
    })
}
