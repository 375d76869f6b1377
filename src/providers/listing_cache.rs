//! Process-wide cache of provider listing pages.
//!
//! Keyed by `(account id, parent, cursor)`. Only consulted for accounts
//! that configure a non-zero TTL; invalidation is TTL-driven plus a
//! protective purge when the cache grows past its size cap.

use crate::models::ListPage;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Protective size cap; exceeded entries are purged, expired first.
pub const MAX_ENTRIES: usize = 3000;

type CacheKey = (i64, String, String);

struct CacheEntry {
    expires_at: DateTime<Utc>,
    page: ListPage,
}

#[derive(Default)]
pub struct ListingCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cached page for the key, unless it has expired.
    pub fn get(&self, account_id: i64, parent: &str, cursor: &str) -> Option<ListPage> {
        let entries = self.entries.read();
        let entry = entries.get(&(account_id, parent.to_string(), cursor.to_string()))?;
        if Utc::now() >= entry.expires_at {
            return None;
        }
        Some(entry.page.clone())
    }

    /// Store a page under the key for `ttl_minutes`. A non-positive TTL is
    /// a no-op.
    pub fn put(
        &self,
        account_id: i64,
        parent: &str,
        cursor: &str,
        ttl_minutes: i64,
        page: ListPage,
    ) {
        if ttl_minutes <= 0 {
            return;
        }
        let mut entries = self.entries.write();
        entries.insert(
            (account_id, parent.to_string(), cursor.to_string()),
            CacheEntry {
                expires_at: Utc::now() + ChronoDuration::minutes(ttl_minutes),
                page,
            },
        );
        if entries.len() > MAX_ENTRIES {
            let now = Utc::now();
            entries.retain(|_, entry| entry.expires_at > now);
            if entries.len() > MAX_ENTRIES {
                log::warn!(
                    "Listing cache still over {} entries after purge, clearing",
                    MAX_ENTRIES
                );
                entries.clear();
            }
        }
    }

    /// Drop every cached page of one account.
    pub fn evict_account(&self, account_id: i64) {
        self.entries
            .write()
            .retain(|(id, _, _), _| *id != account_id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

pub static LISTING_CACHE: Lazy<ListingCache> = Lazy::new(ListingCache::new);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RemoteEntry;

    fn page(name: &str) -> ListPage {
        ListPage {
            entries: vec![RemoteEntry {
                id: format!("/media/{}", name),
                name: name.to_string(),
                is_dir: false,
                size: 1,
            }],
            next_cursor: None,
        }
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = ListingCache::new();
        cache.put(1, "/media", "", 5, page("a.mkv"));
        let hit = cache.get(1, "/media", "").unwrap();
        assert_eq!(hit.entries[0].name, "a.mkv");
    }

    #[test]
    fn test_zero_ttl_not_cached() {
        let cache = ListingCache::new();
        cache.put(1, "/media", "", 0, page("a.mkv"));
        assert!(cache.get(1, "/media", "").is_none());
    }

    #[test]
    fn test_keys_are_distinct() {
        let cache = ListingCache::new();
        cache.put(1, "/media", "", 5, page("a.mkv"));
        assert!(cache.get(2, "/media", "").is_none());
        assert!(cache.get(1, "/other", "").is_none());
        assert!(cache.get(1, "/media", "7").is_none());
    }

    #[test]
    fn test_evict_account() {
        let cache = ListingCache::new();
        cache.put(1, "/media", "", 5, page("a.mkv"));
        cache.put(2, "/media", "", 5, page("b.mkv"));
        cache.evict_account(1);
        assert!(cache.get(1, "/media", "").is_none());
        assert!(cache.get(2, "/media", "").is_some());
    }

    #[test]
    fn test_overflow_clears_when_nothing_expired() {
        let cache = ListingCache::new();
        for i in 0..(MAX_ENTRIES + 1) {
            cache.put(1, &format!("/dir{}", i), "", 60, page("x.mkv"));
        }
        // Nothing has expired, so the overflow purge falls back to a clear.
        assert_eq!(cache.len(), 0);
    }
}
