//! Cache Store Module
//!
//! Main cache engine combining HashMap storage with access tracking,
//! TTL expiration, tag invalidation and an optional durable mirror.

use std::collections::{BTreeSet, HashMap};

use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::cache::{AccessTracker, CacheEntry, CacheStats, EvictionPolicy, MAX_KEY_LENGTH};
use crate::clock::{system_clock, SharedClock};
use crate::error::{Result, SyncError};
use crate::persistence::{PersistenceAdapter, SharedBackend};

// == Cache Config ==
/// Construction-time cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when `set` is given none, in milliseconds
    pub default_ttl_ms: u64,
    /// Maximum number of entries
    pub max_size: usize,
    /// Victim selection when full
    pub eviction_policy: EvictionPolicy,
    /// Mirror entries to a durable backend
    pub persist: bool,
    /// Storage key prefix for mirrored entries
    pub persistence_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 300_000,
            max_size: 100,
            eviction_policy: EvictionPolicy::Lru,
            persist: false,
            persistence_prefix: "portal_cache_".to_string(),
        }
    }
}

// == Set Options ==
/// Per-entry options for [`CacheStore::set`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// TTL in milliseconds; the store default when `None`
    pub ttl_ms: Option<u64>,
    /// Invalidation tags
    pub tags: Vec<String>,
    /// Informational version label
    pub version: Option<String>,
}

impl SetOptions {
    /// Options with only a TTL.
    pub fn ttl(ttl_ms: u64) -> Self {
        Self {
            ttl_ms: Some(ttl_ms),
            ..Self::default()
        }
    }

    /// Adds invalidation tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

// == Cache Store ==
/// Cache storage with policy-driven eviction, TTL and tag support.
pub struct CacheStore<V> {
    /// Key-value storage
    entries: HashMap<String, CacheEntry<V>>,
    /// Access metadata for eviction
    tracker: AccessTracker,
    /// Performance statistics
    stats: CacheStats,
    config: CacheConfig,
    clock: SharedClock,
    /// Durable mirror, present when `config.persist` is set
    persistence: Option<PersistenceAdapter<V>>,
}

impl<V> std::fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("len", &self.entries.len())
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<V> CacheStore<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    // == Constructor ==
    /// Creates an in-memory store on the system clock.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Creates an in-memory store driven by `clock`.
    pub fn with_clock(config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            entries: HashMap::new(),
            tracker: AccessTracker::new(),
            stats: CacheStats::new(config.max_size),
            config,
            clock,
            persistence: None,
        }
    }

    /// Creates a store mirrored into `backend` and restores its live entries.
    ///
    /// Mirroring only happens when `config.persist` is set; otherwise the
    /// backend is ignored.
    pub fn with_persistence(config: CacheConfig, clock: SharedClock, backend: SharedBackend) -> Self {
        let persist = config.persist;
        let prefix = config.persistence_prefix.clone();
        let mut store = Self::with_clock(config, clock);
        if persist {
            store.persistence = Some(PersistenceAdapter::new(backend, prefix));
            store.restore();
        }
        store
    }

    fn restore(&mut self) {
        let Some(adapter) = &self.persistence else {
            return;
        };
        let mut restored = adapter.restore(self.clock.now_ms());
        restored.sort_by_key(|entry| entry.created_at);

        let count = restored.len();
        for entry in restored {
            let key = entry.key.clone();
            if !self.entries.contains_key(&key) && self.entries.len() >= self.config.max_size {
                self.evict_one();
            }
            self.entries.insert(key.clone(), entry);
            self.tracker.insert(&key);
        }
        self.stats.set_size(self.entries.len());
        if count > 0 {
            info!("Restored {} persisted cache entries", count);
        }
    }

    // == Set ==
    /// Stores a value, replacing any previous entry under `key`.
    ///
    /// A new key at capacity evicts exactly one entry per the configured policy.
    pub fn set(&mut self, key: impl Into<String>, value: V, options: SetOptions) -> Result<()> {
        let key = key.into();

        // Validate key
        if key.is_empty() {
            return Err(SyncError::InvalidRequest("Key cannot be empty".to_string()));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(SyncError::InvalidRequest(format!(
                "Key exceeds maximum length of {} bytes",
                MAX_KEY_LENGTH
            )));
        }

        let ttl_ms = options.ttl_ms.unwrap_or(self.config.default_ttl_ms);
        if ttl_ms == 0 {
            return Err(SyncError::InvalidRequest(
                "TTL must be greater than zero".to_string(),
            ));
        }

        // If not overwriting and at capacity, evict one entry
        let is_overwrite = self.entries.contains_key(&key);
        if !is_overwrite && self.entries.len() >= self.config.max_size && self.evict_one().is_none() {
            return Err(SyncError::InvalidRequest(
                "Cache has zero capacity".to_string(),
            ));
        }

        let tags: BTreeSet<String> = options.tags.into_iter().collect();
        let entry = CacheEntry::new(
            key.clone(),
            value,
            self.clock.now_ms(),
            ttl_ms,
            tags,
            options.version.unwrap_or_default(),
        );

        if let Some(adapter) = &self.persistence {
            adapter.store(&entry);
        }
        self.entries.insert(key.clone(), entry);
        self.tracker.insert(&key);
        self.stats.set_size(self.entries.len());

        Ok(())
    }

    // == Get ==
    /// Retrieves a value by key.
    ///
    /// Expired entries are removed and counted as misses.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = self.clock.now_ms();
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                debug!(key, "Cache entry expired");
                self.remove_entry(key);
                self.stats.record_miss();
                None
            }
            Some(entry) => {
                let value = entry.value.clone();
                self.stats.record_hit();
                self.tracker.touch(key);
                Some(value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    // == Has ==
    /// Checks for a live entry without touching access order or statistics.
    ///
    /// An expired entry found here is still removed.
    pub fn has(&mut self, key: &str) -> bool {
        let now = self.clock.now_ms();
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                self.remove_entry(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    // == Delete ==
    /// Removes an entry by key. Returns whether it existed.
    pub fn delete(&mut self, key: &str) -> bool {
        self.remove_entry(key).is_some()
    }

    // == Invalidate By Tag ==
    /// Removes every entry tagged with `tag`. Returns the number removed.
    pub fn invalidate_by_tag(&mut self, tag: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.has_tag(tag))
            .map(|entry| entry.key.clone())
            .collect();
        let count = self.remove_all(keys);
        debug!(tag, count, "Invalidated cache entries by tag");
        count
    }

    // == Invalidate By Pattern ==
    /// Removes every entry whose key matches `pattern`. Returns the number removed.
    pub fn invalidate_by_pattern(&mut self, pattern: &Regex) -> usize {
        let keys: Vec<String> = self
            .entries
            .keys()
            .filter(|key| pattern.is_match(key))
            .cloned()
            .collect();
        let count = self.remove_all(keys);
        debug!(pattern = %pattern, count, "Invalidated cache entries by pattern");
        count
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_size(self.entries.len());
        stats
    }

    // == Cleanup Expired ==
    /// Removes all expired entries from the cache.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = self.clock.now_ms();
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        self.remove_all(expired_keys)
    }

    // == Clear ==
    /// Drops every entry and its persisted mirror. Statistics are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.tracker.clear();
        if let Some(adapter) = &self.persistence {
            adapter.clear();
        }
        self.stats.set_size(0);
    }

    // == Inspection ==
    /// Returns entry metadata without counting an access or checking expiry.
    pub fn entry(&self, key: &str) -> Option<&CacheEntry<V>> {
        self.entries.get(key)
    }

    /// Access count recorded for `key`.
    pub fn access_count(&self, key: &str) -> Option<u64> {
        self.tracker.access_count(key)
    }

    /// Every stored key, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Current time on the store's clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// The store's configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // == Internals ==
    fn evict_one(&mut self) -> Option<String> {
        let victim = self.tracker.victim(self.config.eviction_policy)?.clone();
        self.remove_entry(&victim);
        self.stats.record_eviction();
        debug!(key = %victim, policy = %self.config.eviction_policy, "Evicted cache entry");
        Some(victim)
    }

    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let removed = self.entries.remove(key)?;
        self.tracker.remove(key);
        if let Some(adapter) = &self.persistence {
            adapter.remove(key);
        }
        self.stats.set_size(self.entries.len());
        Some(removed)
    }

    fn remove_all(&mut self, keys: Vec<String>) -> usize {
        keys.iter()
            .filter(|key| self.remove_entry(key).is_some())
            .count()
    }
}
