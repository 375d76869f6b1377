//! Provider abstraction: two remote-storage variants behind one
//! capability set (`list_page`, `resolve_download`, `ping`,
//! `normalize_root`). Callers dispatch on the account's `kind`.

pub mod fslist;
pub mod listing_cache;
pub mod opendrive;
pub mod retry;
pub mod token_cache;

pub use fslist::FsListClient;
pub use opendrive::OpenDriveClient;

use crate::error::ProviderError;
use crate::models::{Account, ListPage, ACCOUNT_KIND_FSLIST, ACCOUNT_KIND_OPENDRIVE};
use listing_cache::LISTING_CACHE;
use std::time::Duration;

/// Outbound requests carry a browser-like User-Agent; some providers answer
/// differently to obvious bots.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Trim a response body for an error message without splitting a UTF-8
/// code point; provider error bodies are often multibyte text.
pub(crate) fn truncate_body(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}

pub enum Provider {
    OpenDrive(OpenDriveClient),
    FsList(FsListClient),
    #[cfg(test)]
    Mock(mock::MockProvider),
}

impl Provider {
    /// Build the client matching the account's kind.
    pub fn from_account(account: &Account) -> Result<Self, ProviderError> {
        match account.kind.as_str() {
            ACCOUNT_KIND_OPENDRIVE => Ok(Self::OpenDrive(OpenDriveClient::new(account.clone()))),
            ACCOUNT_KIND_FSLIST => Ok(Self::FsList(FsListClient::new(account.clone()))),
            other => Err(ProviderError::NotConfigured(format!(
                "unsupported account kind '{}'",
                other
            ))),
        }
    }

    fn account_id(&self) -> i64 {
        match self {
            Self::OpenDrive(client) => client.account().id,
            Self::FsList(client) => client.account().id,
            #[cfg(test)]
            Self::Mock(_) => 0,
        }
    }

    fn cache_ttl_minutes(&self) -> i64 {
        match self {
            Self::OpenDrive(client) => client.account().listing_cache_ttl_minutes,
            Self::FsList(client) => client.account().listing_cache_ttl_minutes,
            #[cfg(test)]
            Self::Mock(_) => 0,
        }
    }

    /// List one page of a remote folder, consulting the process-wide
    /// listing cache when the account configures a TTL.
    pub async fn list_page(
        &self,
        parent: &str,
        cursor: Option<&str>,
    ) -> Result<ListPage, ProviderError> {
        let ttl = self.cache_ttl_minutes();
        let cursor_key = cursor.unwrap_or("");
        if ttl > 0 {
            if let Some(page) = LISTING_CACHE.get(self.account_id(), parent, cursor_key) {
                log::debug!("Listing cache hit for '{}' (cursor '{}')", parent, cursor_key);
                return Ok(page);
            }
        }

        let page = match self {
            Self::OpenDrive(client) => {
                let parent_id: i64 = parent.trim().parse().map_err(|_| {
                    ProviderError::NotConfigured(format!("invalid folder id '{}'", parent))
                })?;
                let cursor_id = match cursor {
                    Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
                        ProviderError::BadResponse(format!("invalid listing cursor '{}'", raw))
                    })?),
                    None => None,
                };
                client.list_page(parent_id, cursor_id).await?
            }
            Self::FsList(client) => client.list_page(parent).await?,
            #[cfg(test)]
            Self::Mock(client) => client.list_page(parent, cursor).await?,
        };

        if ttl > 0 {
            LISTING_CACHE.put(self.account_id(), parent, cursor_key, ttl, page.clone());
        }
        Ok(page)
    }

    /// Resolve a provider identity to a short-lived direct download URL.
    pub async fn resolve_download(&self, identity: &str) -> Result<String, ProviderError> {
        match self {
            Self::OpenDrive(client) => {
                let file_id: i64 = identity.trim().parse().map_err(|_| {
                    ProviderError::NotConfigured(format!("invalid file id '{}'", identity))
                })?;
                client.resolve_download(file_id).await
            }
            Self::FsList(client) => client.resolve_download(identity).await,
            #[cfg(test)]
            Self::Mock(client) => client.resolve_download(identity).await,
        }
    }

    /// Connectivity check used by the account-test endpoint.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        match self {
            Self::OpenDrive(client) => client.ping().await,
            Self::FsList(client) => client.ping().await,
            #[cfg(test)]
            Self::Mock(_) => Ok(()),
        }
    }

    /// Canonical form of a task's source-folder field for this provider.
    pub fn normalize_root(&self, folder: &str) -> String {
        match self {
            Self::OpenDrive(_) => {
                let trimmed = folder.trim();
                if trimmed.is_empty() {
                    "0".to_string()
                } else {
                    trimmed.to_string()
                }
            }
            Self::FsList(_) => FsListClient::normalize_root(folder),
            #[cfg(test)]
            Self::Mock(_) => FsListClient::normalize_root(folder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body_ascii() {
        assert_eq!(truncate_body("short", 200), "short");
        let long = "x".repeat(300);
        assert_eq!(truncate_body(&long, 200).len(), 200);
    }

    #[test]
    fn test_truncate_body_multibyte() {
        // 300 three-byte characters; a byte-indexed slice at 200 would sit
        // inside a code point and panic.
        let body = "错".repeat(300);
        let truncated = truncate_body(&body, 200);
        assert_eq!(truncated.chars().count(), 200);
        assert!(body.is_char_boundary(truncated.len()));
    }
}
