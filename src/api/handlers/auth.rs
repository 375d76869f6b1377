use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

use super::{fail, ok, ok_message, ApiResult};
use crate::api::middleware::CurrentUser;
use crate::auth::{hash_password, issue_session_token, verify_password};
use crate::state::AppState;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Log in and receive a session token
#[utoipa::path(
    post,
    path = "/api/v1/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session token issued"),
        (status = 401, description = "Bad credentials"),
        (status = 429, description = "Too many attempts")
    ),
    tag = "auth"
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<LoginRequest>,
) -> ApiResult {
    if !state.login_limiter.allow(&addr.ip().to_string()) {
        return Err(fail(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many attempts, try again in a minute",
        ));
    }
    if request.username.is_empty() || request.password.is_empty() {
        return Err(fail(
            StatusCode::BAD_REQUEST,
            "Username and password must not be empty",
        ));
    }

    // One message for both failure modes so the endpoint does not reveal
    // which usernames exist.
    let user = state
        .store
        .user_by_username(&request.username)
        .map_err(|_| fail(StatusCode::UNAUTHORIZED, "Bad username or password"))?;
    if !verify_password(&request.password, &user.password_hash) {
        return Err(fail(StatusCode::UNAUTHORIZED, "Bad username or password"));
    }

    let token = issue_session_token(&state.secret, &user.username, user.token_version)
        .map_err(|err| {
            log::error!("Failed to issue session token: {}", err);
            fail(StatusCode::INTERNAL_SERVER_ERROR, "Could not issue token")
        })?;

    log::info!("User '{}' logged in from {}", user.username, addr.ip());
    Ok(ok(json!({ "token": token })))
}

/// Current session's username
#[utoipa::path(
    get,
    path = "/api/v1/username",
    responses((status = 200, description = "Current username")),
    security(("bearerAuth" = [])),
    tag = "auth"
)]
pub async fn username_handler(Extension(user): Extension<CurrentUser>) -> ApiResult {
    Ok(ok(json!({ "username": user.0 })))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCredentialsRequest {
    #[serde(default)]
    pub new_username: String,
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub confirm_password: String,
}

/// Change the username and/or password of the current user
///
/// Any change bumps the token version, so outstanding session tokens stop
/// working and the user must log in again.
#[utoipa::path(
    post,
    path = "/api/v1/update_credentials",
    request_body = UpdateCredentialsRequest,
    responses(
        (status = 200, description = "Credentials updated"),
        (status = 401, description = "Current password wrong"),
        (status = 409, description = "Username taken")
    ),
    security(("bearerAuth" = [])),
    tag = "auth"
)]
pub async fn update_credentials_handler(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    Json(request): Json<UpdateCredentialsRequest>,
) -> ApiResult {
    if request.current_password.is_empty() {
        return Err(fail(
            StatusCode::BAD_REQUEST,
            "Current password must not be empty",
        ));
    }

    let mut user = state
        .store
        .user_by_username(&current.0)
        .map_err(|_| fail(StatusCode::UNAUTHORIZED, "Unknown user"))?;

    if !verify_password(&request.current_password, &user.password_hash) {
        return Err(fail(StatusCode::UNAUTHORIZED, "Current password is wrong"));
    }

    let mut changed = false;

    if !request.new_username.is_empty() && request.new_username != user.username {
        if state.store.user_by_username(&request.new_username).is_ok() {
            return Err(fail(StatusCode::CONFLICT, "Username already taken"));
        }
        user.username = request.new_username.clone();
        changed = true;
    }

    if !request.new_password.is_empty() {
        if request.new_password != request.confirm_password {
            return Err(fail(
                StatusCode::BAD_REQUEST,
                "New passwords do not match",
            ));
        }
        user.password_hash = hash_password(&request.new_password)
            .map_err(|err| fail(StatusCode::INTERNAL_SERVER_ERROR, err))?;
        changed = true;
    }

    if changed {
        user.token_version += 1;
        state.store.update_user(&user).map_err(|err| {
            fail(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to update credentials: {}", err),
            )
        })?;
    }

    Ok(ok_message("Credentials updated, please log in again"))
}
