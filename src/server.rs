use crate::api::handlers;
use crate::api::middleware::{access_log_middleware, auth_middleware};
use crate::openapi::ApiDoc;
use crate::state::AppState;
use axum::{
    middleware,
    response::Json,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;

/// Create the Axum router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required): health, the API document, login
    // and pointer-URL resolution (media players carry no session).
    let public_routes = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/openapi.json", get(openapi_handler))
        .route("/api/v1/login", post(handlers::auth::login_handler))
        .route(
            "/api/v1/stream/s/*tail",
            get(handlers::stream::stream_handler),
        );

    // Protected routes (require a Bearer session token)
    let protected_routes = Router::new()
        .route("/api/v1/username", get(handlers::auth::username_handler))
        .route(
            "/api/v1/update_credentials",
            post(handlers::auth::update_credentials_handler),
        )
        .route(
            "/api/v1/accounts",
            get(handlers::accounts::list_handler).post(handlers::accounts::create_handler),
        )
        .route(
            "/api/v1/accounts/:id",
            put(handlers::accounts::update_handler).delete(handlers::accounts::delete_handler),
        )
        .route("/api/v1/accounts/test", post(handlers::accounts::test_handler))
        .route(
            "/api/v1/tasks",
            get(handlers::tasks::list_handler).post(handlers::tasks::create_handler),
        )
        .route(
            "/api/v1/tasks/:id",
            put(handlers::tasks::update_handler).delete(handlers::tasks::delete_handler),
        )
        .route("/api/v1/tasks/:id/run", post(handlers::tasks::run_handler))
        .route("/api/v1/tasks/:id/stop", post(handlers::tasks::stop_handler))
        .route("/api/v1/cloud/files", get(handlers::cloud::browse_handler))
        .route(
            "/api/v1/settings/webhook",
            get(handlers::settings::get_webhook_handler)
                .post(handlers::settings::set_webhook_handler),
        )
        .route("/api/v1/settings/logs", get(handlers::settings::logs_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(middleware::from_fn(access_log_middleware))
        .layer(cors)
        .with_state(state)
}

/// Serve the OpenAPI spec as JSON
async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
