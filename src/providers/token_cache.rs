//! Process-wide provider token caches with single-flight refresh.
//!
//! One cache per provider kind, keyed by account id. Readers return the
//! cached token while it is outside the refresh window; otherwise they
//! serialize on a per-account refresh gate so that N concurrent consumers
//! of an expired token cause exactly one outbound refresh.

use crate::error::ProviderError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Tokens are refreshed this many minutes before their recorded expiry.
pub const REFRESH_WINDOW_MINUTES: i64 = 5;

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

struct Entry {
    state: RwLock<Option<CachedToken>>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl Entry {
    fn new() -> Self {
        Self {
            state: RwLock::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// The cached token, if it is still outside the refresh window.
    fn fresh(&self) -> Option<String> {
        let state = self.state.read();
        match state.as_ref() {
            Some(cached)
                if Utc::now()
                    < cached.expires_at - ChronoDuration::minutes(REFRESH_WINDOW_MINUTES) =>
            {
                Some(cached.token.clone())
            }
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct TokenCache {
    entries: Mutex<HashMap<i64, Arc<Entry>>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, account_id: i64) -> Arc<Entry> {
        let mut entries = self.entries.lock();
        entries
            .entry(account_id)
            .or_insert_with(|| Arc::new(Entry::new()))
            .clone()
    }

    /// Return the account's token, invoking `refresh` at most once across
    /// concurrent callers when the cached value is missing or about to
    /// expire.
    pub async fn get_or_refresh<F, Fut>(
        &self,
        account_id: i64,
        refresh: F,
    ) -> Result<String, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedToken, ProviderError>>,
    {
        let entry = self.entry(account_id);

        if let Some(token) = entry.fresh() {
            return Ok(token);
        }

        let _gate = entry.refresh_gate.lock().await;
        // Double check: another caller may have refreshed while we waited.
        if let Some(token) = entry.fresh() {
            return Ok(token);
        }

        let fresh = refresh().await?;
        let token = fresh.token.clone();
        *entry.state.write() = Some(fresh);
        Ok(token)
    }

    /// Drop the cached token of one account (account deletion/update).
    pub fn evict(&self, account_id: i64) {
        self.entries.lock().remove(&account_id);
    }
}

/// Token cache for opendrive accounts.
pub static OPENDRIVE_TOKENS: Lazy<TokenCache> = Lazy::new(TokenCache::new);

/// Token cache for fslist accounts.
pub static FSLIST_TOKENS: Lazy<TokenCache> = Lazy::new(TokenCache::new);

/// Evict one account from every token cache.
pub fn evict_account(account_id: i64) {
    OPENDRIVE_TOKENS.evict(account_id);
    FSLIST_TOKENS.evict(account_id);
}
