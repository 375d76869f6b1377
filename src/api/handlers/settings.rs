use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use super::{fail, ok, ok_message, ApiResult};
use crate::config::get_log_file_path;
use crate::state::AppState;

/// How much of the log tail the UI gets.
const LOG_TAIL_BYTES: u64 = 50 * 1024;

/// The admin user's webhook URL
#[utoipa::path(
    get,
    path = "/api/v1/settings/webhook",
    responses((status = 200, description = "Current webhook URL")),
    security(("bearerAuth" = [])),
    tag = "settings"
)]
pub async fn get_webhook_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let user = state
        .store
        .first_user()
        .map_err(|_| fail(StatusCode::INTERNAL_SERVER_ERROR, "No user configured"))?;
    Ok(ok(json!({ "webhookUrl": user.webhook_url })))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequest {
    #[serde(default)]
    pub webhook_url: String,
}

/// Set the admin user's webhook URL (empty disables notifications)
#[utoipa::path(
    post,
    path = "/api/v1/settings/webhook",
    request_body = WebhookRequest,
    responses((status = 200, description = "Webhook updated")),
    security(("bearerAuth" = [])),
    tag = "settings"
)]
pub async fn set_webhook_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WebhookRequest>,
) -> ApiResult {
    let mut user = state
        .store
        .first_user()
        .map_err(|_| fail(StatusCode::INTERNAL_SERVER_ERROR, "No user configured"))?;
    user.webhook_url = request.webhook_url.trim().to_string();
    state.store.update_user(&user).map_err(|err| {
        fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to save webhook: {}", err),
        )
    })?;
    Ok(ok_message("Webhook updated"))
}

/// The last 50 KiB of the daemon log
#[utoipa::path(
    get,
    path = "/api/v1/settings/logs",
    responses((status = 200, description = "Recent log tail")),
    security(("bearerAuth" = [])),
    tag = "settings"
)]
pub async fn logs_handler(State(_state): State<Arc<AppState>>) -> ApiResult {
    let tail = read_log_tail().map_err(|err| {
        fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to read log file: {}", err),
        )
    })?;
    Ok(ok(json!({ "logs": tail })))
}

fn read_log_tail() -> std::io::Result<String> {
    let mut file = std::fs::File::open(get_log_file_path())?;
    let size = file.metadata()?.len();
    let read_size = size.min(LOG_TAIL_BYTES);

    file.seek(SeekFrom::Start(size - read_size))?;
    let mut buffer = Vec::with_capacity(read_size as usize);
    file.read_to_end(&mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
