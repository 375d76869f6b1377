use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// OpenAPI specification for the shadowstream REST API, served at
/// `/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "shadowstream API",
        version = "1.0.0",
        description = "Cloud drive mirroring daemon: tasks, accounts and pointer-URL resolution"
    ),
    paths(
        crate::api::handlers::health_handler,
        crate::api::handlers::auth::login_handler,
        crate::api::handlers::auth::username_handler,
        crate::api::handlers::auth::update_credentials_handler,
        crate::api::handlers::accounts::list_handler,
        crate::api::handlers::accounts::create_handler,
        crate::api::handlers::accounts::update_handler,
        crate::api::handlers::accounts::delete_handler,
        crate::api::handlers::accounts::test_handler,
        crate::api::handlers::tasks::list_handler,
        crate::api::handlers::tasks::create_handler,
        crate::api::handlers::tasks::update_handler,
        crate::api::handlers::tasks::delete_handler,
        crate::api::handlers::tasks::run_handler,
        crate::api::handlers::tasks::stop_handler,
        crate::api::handlers::cloud::browse_handler,
        crate::api::handlers::stream::stream_handler,
        crate::api::handlers::settings::get_webhook_handler,
        crate::api::handlers::settings::set_webhook_handler,
        crate::api::handlers::settings::logs_handler,
    ),
    components(
        schemas(
            crate::api::handlers::HealthResponse,
            crate::api::handlers::auth::LoginRequest,
            crate::api::handlers::auth::UpdateCredentialsRequest,
            crate::api::handlers::settings::WebhookRequest,
            crate::models::Account,
            crate::models::Task,
            crate::models::RemoteEntry,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "system", description = "Health and status endpoints"),
        (name = "auth", description = "Login and credential management"),
        (name = "accounts", description = "Cloud account management"),
        (name = "tasks", description = "Scan task management"),
        (name = "cloud", description = "Remote folder browsing"),
        (name = "stream", description = "Pointer-URL resolution"),
        (name = "settings", description = "Daemon settings and diagnostics")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearerAuth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}
