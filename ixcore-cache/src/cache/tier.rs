//! A single bounded cache tier with LRU eviction and lazy expiration

use crate::cache::{
    config::TierConfig,
    entry::{CacheEntry, ExpirationPolicy},
    types::{CacheKey, CacheStats, CachedValue, TierKind},
};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

/// One tier of the gate.
///
/// All operations take a short synchronous lock; nothing here awaits, so the
/// tier can be touched from inside map-entry critical sections of the gate.
pub struct CacheTier {
    kind: TierKind,
    config: TierConfig,
    store: Mutex<TierStore>,
}

/// Internal tier storage
struct TierStore {
    /// Main storage: key -> entry
    entries: HashMap<CacheKey, CacheEntry>,

    /// LRU tracking: front is least recently used
    lru_queue: VecDeque<CacheKey>,

    stats: CacheStats,
}

impl CacheTier {
    pub fn new(kind: TierKind, config: TierConfig) -> Self {
        info!(
            "Initializing cache tier {} (max_entries: {}, ttl: {:?}, tti: {:?})",
            kind, config.max_entries, config.time_to_live, config.time_to_idle
        );

        Self {
            kind,
            config,
            store: Mutex::new(TierStore {
                entries: HashMap::new(),
                lru_queue: VecDeque::new(),
                stats: CacheStats::new(kind),
            }),
        }
    }

    pub fn kind(&self) -> TierKind {
        self.kind
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    /// Insert a value; `None` expiration uses the tier's configured TTL/TTI
    pub fn insert(&self, key: CacheKey, value: CachedValue, expiration: Option<ExpirationPolicy>) {
        let expiration = expiration.unwrap_or_else(|| self.config.default_expiration());
        let entry = CacheEntry::new(key.clone(), value, self.kind, expiration);

        let mut store = self.store.lock();

        if store.entries.contains_key(&key) {
            debug!("Replacing cache entry in {}: {}", self.kind, key);
            store.lru_queue.retain(|k| k != &key);
        } else {
            Self::evict_if_needed(&mut store, self.config.max_entries, self.kind);
        }

        store.entries.insert(key.clone(), entry);
        store.lru_queue.push_back(key);
        store.stats.entries = store.entries.len();
    }

    /// Look up an entry, updating access metadata and hit/miss counters.
    /// Expired entries are dropped and reported as misses.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut store = self.store.lock();
        let now = Utc::now();

        let expired = match store.entries.get(key) {
            None => {
                store.stats.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired_at(now),
        };

        if expired {
            debug!("Cache entry expired in {}: {}", self.kind, key);
            Self::remove_entry(&mut store, key);
            store.stats.misses += 1;
            store.stats.evictions_ttl += 1;
            return None;
        }

        let entry = store.entries.get_mut(key).map(|entry| {
            entry.mark_accessed();
            entry.clone()
        });
        store.stats.hits += 1;

        store.lru_queue.retain(|k| k != key);
        store.lru_queue.push_back(key.to_string());

        entry
    }

    /// Look up an entry without touching access metadata or counters
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        let store = self.store.lock();
        store
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .cloned()
    }

    /// Check if a live entry exists for the key
    pub fn contains(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    /// Remove a specific entry
    pub fn remove(&self, key: &str) -> bool {
        let mut store = self.store.lock();
        if Self::remove_entry(&mut store, key) {
            store.stats.invalidations += 1;
            debug!("Removed cache entry from {}: {}", self.kind, key);
            true
        } else {
            false
        }
    }

    /// Remove every entry, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut store = self.store.lock();

        let count = store.entries.len();
        store.entries.clear();
        store.lru_queue.clear();
        store.stats.entries = 0;
        store.stats.invalidations += count as u64;

        info!("Cleared {} entries from {}", count, self.kind);
        count
    }

    /// Snapshot of the keys, least recently used first
    pub fn keys(&self) -> Vec<CacheKey> {
        self.store.lock().lru_queue.iter().cloned().collect()
    }

    /// Remove all expired entries
    pub fn cleanup_expired(&self) -> usize {
        let mut store = self.store.lock();
        let now = Utc::now();

        let expired_keys: Vec<CacheKey> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            Self::remove_entry(&mut store, key);
        }
        store.stats.evictions_ttl += expired_keys.len() as u64;

        if !expired_keys.is_empty() {
            debug!("Cleaned up {} expired entries from {}", expired_keys.len(), self.kind);
        }
        expired_keys.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.store.lock().stats.clone()
    }

    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_entry(store: &mut TierStore, key: &str) -> bool {
        if store.entries.remove(key).is_some() {
            store.lru_queue.retain(|k| k != key);
            store.stats.entries = store.entries.len();
            true
        } else {
            false
        }
    }

    fn evict_if_needed(store: &mut TierStore, max_entries: usize, kind: TierKind) {
        while store.entries.len() >= max_entries {
            match store.lru_queue.pop_front() {
                Some(key) => {
                    debug!("Evicting entry from {} due to max_entries limit: {}", kind, key);
                    store.entries.remove(&key);
                    store.stats.evictions_size += 1;
                }
                None => break,
            }
        }
        store.stats.entries = store.entries.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn tier(max_entries: usize, ttl: Duration) -> CacheTier {
        CacheTier::new(
            TierKind::Evictable,
            TierConfig::new(max_entries, ttl, Duration::ZERO),
        )
    }

    fn value(s: &str) -> CachedValue {
        Arc::new(s.to_string())
    }

    #[test]
    fn test_basic_insert_and_get() {
        let tier = tier(100, Duration::from_secs(60));
        tier.insert("key1".to_string(), value("value1"), None);

        let entry = tier.get("key1").unwrap();
        assert_eq!(entry.downcast::<String>().as_deref(), Some(&"value1".to_string()));

        let stats = tier.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_miss() {
        let tier = tier(100, Duration::from_secs(60));
        assert!(tier.get("nonexistent").is_none());
        assert_eq!(tier.stats().misses, 1);
    }

    #[test]
    fn test_ttl_expiration() {
        let tier = tier(100, Duration::from_millis(100));
        tier.insert("key1".to_string(), value("value1"), None);
        assert!(tier.get("key1").is_some());

        std::thread::sleep(Duration::from_millis(150));

        assert!(tier.get("key1").is_none());
        assert_eq!(tier.stats().evictions_ttl, 1);
    }

    #[test]
    fn test_explicit_eternal_overrides_tier_ttl() {
        let tier = tier(100, Duration::from_millis(50));
        tier.insert("key1".to_string(), value("value1"), Some(ExpirationPolicy::Eternal));

        std::thread::sleep(Duration::from_millis(80));
        assert!(tier.get("key1").is_some());
    }

    #[test]
    fn test_lru_eviction() {
        let tier = tier(3, Duration::from_secs(60));

        tier.insert("key1".to_string(), value("value1"), None);
        tier.insert("key2".to_string(), value("value2"), None);
        tier.insert("key3".to_string(), value("value3"), None);

        // touch key1 so key2 becomes least recently used
        assert!(tier.get("key1").is_some());

        tier.insert("key4".to_string(), value("value4"), None);

        assert!(tier.get("key2").is_none());
        assert!(tier.get("key1").is_some());
        assert!(tier.get("key3").is_some());
        assert!(tier.get("key4").is_some());
        assert_eq!(tier.stats().evictions_size, 1);
    }

    #[test]
    fn test_replace_does_not_evict() {
        let tier = tier(2, Duration::from_secs(60));
        tier.insert("key1".to_string(), value("a"), None);
        tier.insert("key2".to_string(), value("b"), None);
        tier.insert("key1".to_string(), value("c"), None);

        assert_eq!(tier.len(), 2);
        assert_eq!(tier.stats().evictions_size, 0);
        assert_eq!(
            tier.peek("key1").and_then(|e| e.downcast::<String>()).as_deref(),
            Some(&"c".to_string())
        );
    }

    #[test]
    fn test_remove_and_clear() {
        let tier = tier(10, Duration::from_secs(60));
        tier.insert("key1".to_string(), value("value1"), None);
        tier.insert("key2".to_string(), value("value2"), None);

        assert!(tier.remove("key1"));
        assert!(!tier.remove("key1"));
        assert!(!tier.contains("key1"));

        assert_eq!(tier.clear(), 1);
        assert!(tier.is_empty());
    }

    #[test]
    fn test_keys_in_lru_order() {
        let tier = tier(10, Duration::from_secs(60));
        tier.insert("a".to_string(), value("1"), None);
        tier.insert("b".to_string(), value("2"), None);
        tier.get("a");

        assert_eq!(tier.keys(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_cleanup_expired() {
        let tier = tier(10, Duration::from_millis(50));
        tier.insert("key1".to_string(), value("value1"), None);
        tier.insert("key2".to_string(), value("value2"), Some(ExpirationPolicy::Eternal));

        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(tier.cleanup_expired(), 1);
        assert_eq!(tier.len(), 1);
        assert!(tier.contains("key2"));
    }
}
