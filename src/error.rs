//! Error types shared across the daemon.

use thiserror::Error;

/// Errors produced by the provider clients.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with something other than a well-formed
    /// response: a 5xx status or a body that did not parse.
    #[error("unexpected provider response: {0}")]
    BadResponse(String),

    /// The provider asked us to back off.
    #[error("rate limited by provider")]
    RateLimited,

    /// Well-formed provider response carrying a non-success status code.
    #[error("provider API error (code {code}): {message}")]
    Api { code: i64, message: String },

    /// Token acquisition or parsing failed.
    #[error("token error: {0}")]
    Token(String),

    /// The account record is missing something the client needs.
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether retrying the request at the transport layer can help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Http(_) | ProviderError::BadResponse(_) | ProviderError::RateLimited
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited)
    }
}

/// Rejections from the signed pointer-URL verifier. Never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignError {
    #[error("malformed signature token")]
    Malformed,
    #[error("signature expired")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
}

/// Errors from the embedded store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("record not found")]
    NotFound,
}
