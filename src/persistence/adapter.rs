//! Persistence Adapter
//!
//! Mirrors cache entries into a durable backend under a key prefix and
//! restores them on warm start. Every failure is logged and swallowed.

use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::cache::CacheEntry;
use crate::persistence::SharedBackend;

// == Persistence Adapter ==
/// Best-effort mirror of a cache into a [`PersistenceBackend`](super::PersistenceBackend).
pub struct PersistenceAdapter<V> {
    backend: SharedBackend,
    prefix: String,
    _value: PhantomData<fn() -> V>,
}

impl<V> std::fmt::Debug for PersistenceAdapter<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceAdapter")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl<V> PersistenceAdapter<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Creates an adapter writing under `prefix`.
    pub fn new(backend: SharedBackend, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            _value: PhantomData,
        }
    }

    /// Storage key for a cache key: `{prefix}{key}`.
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    // == Mirror Set ==
    /// Writes the entry as JSON.
    pub fn store(&self, entry: &CacheEntry<V>) {
        let storage_key = self.storage_key(&entry.key);
        let raw = match serde_json::to_string(entry) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key = %entry.key, error = %err, "Failed to serialize cache entry");
                return;
            }
        };
        if let Err(err) = self.backend.write(&storage_key, &raw) {
            warn!(key = %entry.key, error = %err, "Failed to persist cache entry");
        }
    }

    // == Mirror Delete ==
    /// Removes the persisted copy of `key`.
    pub fn remove(&self, key: &str) {
        if let Err(err) = self.backend.remove(&self.storage_key(key)) {
            warn!(key, error = %err, "Failed to remove persisted cache entry");
        }
    }

    // == Restore ==
    /// Loads every persisted entry under the prefix that is still live at
    /// `now_ms`. Expired and undecodable records are purged.
    pub fn restore(&self, now_ms: u64) -> Vec<CacheEntry<V>> {
        let keys = match self.backend.keys_with_prefix(&self.prefix) {
            Ok(keys) => keys,
            Err(err) => {
                warn!(prefix = %self.prefix, error = %err, "Failed to scan persisted cache");
                return Vec::new();
            }
        };

        let mut restored = Vec::new();
        for storage_key in keys {
            let raw = match self.backend.read(&storage_key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(err) => {
                    warn!(key = %storage_key, error = %err, "Failed to read persisted entry");
                    continue;
                }
            };

            match serde_json::from_str::<CacheEntry<V>>(&raw) {
                Ok(entry) if !entry.is_expired(now_ms) => restored.push(entry),
                Ok(_) => {
                    debug!(key = %storage_key, "Purging expired persisted entry");
                    self.purge(&storage_key);
                }
                Err(err) => {
                    warn!(key = %storage_key, error = %err, "Purging undecodable persisted entry");
                    self.purge(&storage_key);
                }
            }
        }
        restored
    }

    // == Clear ==
    /// Removes every persisted entry under the prefix.
    pub fn clear(&self) {
        match self.backend.keys_with_prefix(&self.prefix) {
            Ok(keys) => keys.iter().for_each(|key| self.purge(key)),
            Err(err) => warn!(prefix = %self.prefix, error = %err, "Failed to clear persisted cache"),
        }
    }

    fn purge(&self, storage_key: &str) {
        if let Err(err) = self.backend.remove(storage_key) {
            warn!(key = %storage_key, error = %err, "Failed to purge persisted entry");
        }
    }
}
