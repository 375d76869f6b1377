use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ============ Account ============

pub const ACCOUNT_KIND_OPENDRIVE: &str = "opendrive";
pub const ACCOUNT_KIND_FSLIST: &str = "fslist";

/// A remote-provider credential record.
///
/// `opendrive` accounts authenticate with a client id/secret pair against the
/// fixed API endpoint; `fslist` accounts point at a self-hosted listing
/// service and carry either a static token or a username/password login.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default = "default_account_kind")]
    pub kind: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub static_token: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Base URL written into pointer files; the loopback bind when empty.
    #[serde(default)]
    pub pointer_base: String,
    /// Listing-page cache TTL in minutes; 0 disables the cache.
    #[serde(default)]
    pub listing_cache_ttl_minutes: i64,
}

fn default_account_kind() -> String {
    ACCOUNT_KIND_OPENDRIVE.to_string()
}

// ============ Task ============

/// A scan specification: one remote folder mirrored into one local directory
/// on a cron schedule.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub account_id: i64,
    /// Provider-dependent folder identifier: numeric id for opendrive,
    /// absolute path for fslist.
    pub source_folder: String,
    pub local_path: String,
    pub cron: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// When false, existing local files are neither rewritten nor
    /// re-downloaded.
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub sync_delete: bool,
    /// Selects the signed pointer-URL form instead of the plain one.
    #[serde(default)]
    pub encode_path: bool,
    #[serde(default = "default_stream_extensions")]
    pub stream_extensions: String,
    #[serde(default = "default_meta_extensions")]
    pub meta_extensions: String,
    #[serde(default = "default_threads")]
    pub threads: i64,
}

impl Task {
    /// Worker count clamped to what the providers tolerate.
    pub fn clamped_threads(&self) -> usize {
        self.threads.clamp(1, 16) as usize
    }
}

pub fn default_stream_extensions() -> String {
    "mp4,mkv,ts,iso".to_string()
}

pub fn default_meta_extensions() -> String {
    "jpg,jpeg,png,webp,srt,ass,sub".to_string()
}

fn default_threads() -> i64 {
    4
}

fn default_true() -> bool {
    true
}

/// Split a comma-separated extension list into a lowercase lookup set.
pub fn parse_extensions(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|part| part.trim().to_lowercase())
        .filter(|part| !part.is_empty())
        .collect()
}

// ============ User ============

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub token_version: i64,
    pub webhook_url: String,
}

// ============ Provider listing ============

/// One entry of a provider listing page.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    /// Provider identity: decimal file id (opendrive) or absolute remote
    /// path (fslist).
    pub id: String,
    pub name: String,
    pub is_dir: bool,
    pub size: i64,
}

/// One page of a provider listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<RemoteEntry>,
    /// Cursor for the next page; `None` means this page was the last.
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extensions_trims_and_lowercases() {
        let set = parse_extensions("MP4, mkv ,ts,,ISO");
        assert_eq!(set.len(), 4);
        assert!(set.contains("mp4"));
        assert!(set.contains("mkv"));
        assert!(set.contains("ts"));
        assert!(set.contains("iso"));
    }

    #[test]
    fn test_parse_extensions_empty() {
        assert!(parse_extensions("").is_empty());
        assert!(parse_extensions(" , ,").is_empty());
    }

    #[test]
    fn test_thread_clamp() {
        let mut task = sample_task();
        task.threads = 0;
        assert_eq!(task.clamped_threads(), 1);
        task.threads = 4;
        assert_eq!(task.clamped_threads(), 4);
        task.threads = 64;
        assert_eq!(task.clamped_threads(), 16);
        task.threads = -3;
        assert_eq!(task.clamped_threads(), 1);
    }

    pub(crate) fn sample_task() -> Task {
        Task {
            id: 1,
            name: "shows".to_string(),
            account_id: 1,
            source_folder: "/media".to_string(),
            local_path: "/tmp/out".to_string(),
            cron: "0 0 3 * * *".to_string(),
            enabled: true,
            overwrite: false,
            sync_delete: false,
            encode_path: false,
            stream_extensions: default_stream_extensions(),
            meta_extensions: default_meta_extensions(),
            threads: 4,
        }
    }
}
