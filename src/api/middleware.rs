use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;

use crate::auth::decode_session_token;
use crate::state::AppState;

/// Username of the authenticated caller, injected into request extensions.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

/// Auth middleware - validates the Bearer session token and its version
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = auth_header
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| {
            log::warn!("API: Missing or invalid Authorization header");
            StatusCode::UNAUTHORIZED
        })?;

    let claims = decode_session_token(&state.secret, token).map_err(|err| {
        log::warn!("API: Session token rejected: {}", err);
        StatusCode::UNAUTHORIZED
    })?;

    // Token version must match the user's current one; changing the
    // credentials bumps the version and strands old tokens.
    let user = state.store.user_by_username(&claims.username).map_err(|_| {
        log::warn!("API: Session token names an unknown user");
        StatusCode::UNAUTHORIZED
    })?;
    if user.token_version != claims.version {
        log::warn!("API: Session token version is stale");
        return Err(StatusCode::UNAUTHORIZED);
    }

    request.extensions_mut().insert(CurrentUser(claims.username));
    Ok(next.run(request).await)
}

/// Access logging middleware - logs all HTTP requests
pub async fn access_log_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    log::info!(
        "API: {} {} {} {}ms",
        method,
        path,
        response.status().as_u16(),
        start.elapsed().as_millis()
    );

    response
}
