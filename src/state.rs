use crate::auth::LoginLimiter;
use crate::scheduler::Scheduler;
use crate::signer::UrlSigner;
use crate::store::Store;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state for the REST server
pub struct AppState {
    pub store: Store,
    pub scheduler: Scheduler,
    pub signer: Arc<UrlSigner>,
    /// Process signing secret; backs session tokens and signed pointer URLs.
    pub secret: Vec<u8>,
    pub login_limiter: LoginLimiter,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        store: Store,
        scheduler: Scheduler,
        signer: Arc<UrlSigner>,
        secret: Vec<u8>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            scheduler,
            signer,
            secret,
            login_limiter: LoginLimiter::new(),
            start_time: Instant::now(),
        })
    }

    /// Get server uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
