//! Bounded in-memory cache of string values with per-entry TTL.
//!
//! Eviction is by insertion order: reads use `peek`, so a hit never makes an
//! entry younger. Expired entries are dropped when they are read.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;

/// Default number of entries.
pub const DEFAULT_CAPACITY: usize = 10;

/// TTL used by [`CacheService::put`]: one year.
pub const DEFAULT_TTL: Duration = Duration::from_secs(31_536_000);

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(value: String, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: now.checked_add(ttl).unwrap_or(now + DEFAULT_TTL),
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Shared cache for upstream responses and one-time payloads.
#[derive(Debug)]
pub struct CacheService {
    store: Mutex<LruCache<String, CacheEntry>>,
}

impl CacheService {
    /// Cache holding at most `capacity` entries (zero is treated as one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        tracing::debug!(capacity = capacity.get(), "Cache initialised");
        Self {
            store: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Live value for `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut store = self.store.lock();
        match store.peek(key) {
            Some(entry) if !entry.is_expired() => {
                tracing::trace!(key, "Cache hit");
                Some(entry.value.clone())
            }
            Some(_) => {
                store.pop(key);
                tracing::debug!(key, "Cache entry expired");
                None
            }
            None => None,
        }
    }

    /// Store `value` with the default TTL. `None` removes the key.
    pub fn put(&self, key: &str, value: Option<String>) {
        self.put_with_ttl(key, value, DEFAULT_TTL);
    }

    /// Store `value` for `ttl`. `None` removes the key.
    ///
    /// Replacing an existing key keeps its position in the eviction order.
    pub fn put_with_ttl(&self, key: &str, value: Option<String>, ttl: Duration) {
        let mut store = self.store.lock();
        let Some(value) = value else {
            store.pop(key);
            tracing::debug!(key, "Cache remove");
            return;
        };

        let entry = CacheEntry::new(value, ttl);
        if let Some(slot) = store.peek_mut(key) {
            *slot = entry;
        } else if let Some((evicted, _)) = store.push(key.to_string(), entry) {
            tracing::debug!(key = %evicted, "Evicted oldest cache entry");
        }
    }

    /// Cached JSON document for `key`. An entry that no longer parses is
    /// dropped so the caller refetches it.
    pub fn get_json(&self, key: &str) -> Option<Value> {
        let raw = self.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding unparsable cache entry");
                self.put(key, None);
                None
            }
        }
    }

    /// Store `value` as JSON text for `ttl`.
    pub fn put_json(&self, key: &str, value: &Value, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(raw) => self.put_with_ttl(key, Some(raw), ttl),
            Err(e) => tracing::warn!(key, error = %e, "Failed to cache document"),
        }
    }

    /// Remove `key`, returning whether a live entry was present.
    pub fn remove(&self, key: &str) -> bool {
        let mut store = self.store.lock();
        store
            .pop(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.store.lock().clear();
    }

    /// Entries stored, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CacheService {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(cache: &CacheService, key: &str, value: &str) {
        cache.put(key, Some(value.to_string()));
    }

    #[test]
    fn test_put_and_get() {
        let cache = CacheService::default();
        put(&cache, "lines", "[1,2]");

        assert_eq!(cache.get("lines").as_deref(), Some("[1,2]"));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn test_evicts_oldest_inserted() {
        let cache = CacheService::new(2);
        put(&cache, "a", "1");
        put(&cache, "b", "2");

        // A read must not refresh "a".
        assert!(cache.get("a").is_some());
        put(&cache, "c", "3");

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b").as_deref(), Some("2"));
        assert_eq!(cache.get("c").as_deref(), Some("3"));
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let cache = CacheService::new(2);
        put(&cache, "a", "1");
        put(&cache, "b", "2");
        put(&cache, "a", "updated");
        put(&cache, "c", "3");

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b").as_deref(), Some("2"));
    }

    #[test]
    fn test_expired_entry_removed_on_read() {
        let cache = CacheService::default();
        cache.put_with_ttl("trains", Some("x".into()), Duration::ZERO);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("trains"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_json_round_trip_and_corrupt_entry() {
        let cache = CacheService::default();
        cache.put_json("lines", &serde_json::json!({ "features": [] }), DEFAULT_TTL);
        assert_eq!(cache.get_json("lines"), Some(serde_json::json!({ "features": [] })));

        put(&cache, "stations:1", "{not json");
        assert_eq!(cache.get_json("stations:1"), None);
        assert!(cache.get("stations:1").is_none());
    }

    #[test]
    fn test_put_none_removes() {
        let cache = CacheService::default();
        put(&cache, "otp:1", "{}");
        cache.put("otp:1", None);

        assert_eq!(cache.get("otp:1"), None);
    }

    #[test]
    fn test_remove_reports_presence() {
        let cache = CacheService::default();
        put(&cache, "k", "v");

        assert!(cache.remove("k"));
        assert!(!cache.remove("k"));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let cache = CacheService::new(0);
        put(&cache, "a", "1");
        put(&cache, "b", "2");

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("b").as_deref(), Some("2"));
    }
}
