mod api;
mod auth;
mod config;
mod error;
mod logging;
mod models;
mod notify;
mod openapi;
mod providers;
mod scanner;
mod scheduler;
mod secret;
mod server;
mod signer;
mod state;
mod store;

use crate::notify::Notifier;
use crate::scanner::ScanDeps;
use crate::scheduler::{RunStates, Scheduler};
use crate::signer::UrlSigner;
use crate::state::AppState;
use crate::store::Store;
use anyhow::Context;
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// After the listener stops, running scans get this long to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config();
    logging::init_logging(&config);

    let data_dir = config::get_data_dir();
    let secret = secret::load_or_generate(&data_dir).context("loading signing secret")?;

    let store = Store::open(&config::get_db_path()).context("opening embedded store")?;
    info!("Embedded store ready at {:?}", config::get_db_path());

    let signer = Arc::new(UrlSigner::new(secret.clone()));
    let notifier = Notifier::new(store.clone());
    let run_states = Arc::new(RunStates::new());
    let deps = ScanDeps {
        store: store.clone(),
        signer: signer.clone(),
        notifier,
        run_states: run_states.clone(),
    };

    let scheduler = Scheduler::new(deps);
    scheduler.init();

    let state = AppState::new(store, scheduler.clone(), signer, secret);
    let app = server::create_router(state)
        .into_make_service_with_connect_info::<SocketAddr>();

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!("shadowstream listening on {}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Listener is closed; cancel every running scan and give the workers a
    // moment to observe it.
    info!("Shutting down, stopping running tasks...");
    scheduler.shutdown();
    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    while run_states.active_count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    info!("Bye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => error!("Failed to listen for SIGTERM: {}", err),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
