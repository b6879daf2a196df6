//! Shared Cache Handle
//!
//! Thread-safe, clonable handle over a [`CacheStore`] adding the async
//! `get_or_fetch` read-through path with per-key producer coalescing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStats, CacheStore, SetOptions};
use crate::error::Result;

// == Fetch Options ==
/// Options for [`SharedCache::get_or_fetch`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// TTL for the produced value; store default when `None`
    pub ttl_ms: Option<u64>,
    /// Tags for the produced value
    pub tags: Vec<String>,
    /// Skip the cache lookup and always run the producer
    pub force_refresh: bool,
}

struct Inner<V> {
    store: Mutex<CacheStore<V>>,
    /// One gate per key with a producer running
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

// == Shared Cache ==
/// Clonable handle to a cache store shared between components.
pub struct SharedCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for SharedCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for SharedCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCache").finish_non_exhaustive()
    }
}

impl<V> SharedCache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// Wraps a store for sharing.
    pub fn new(store: CacheStore<V>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: Mutex::new(store),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Runs `f` with exclusive access to the underlying store.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut CacheStore<V>) -> R) -> R {
        f(&mut self.inner.store.lock())
    }

    /// See [`CacheStore::set`].
    pub fn set(&self, key: impl Into<String>, value: V, options: SetOptions) -> Result<()> {
        self.inner.store.lock().set(key, value, options)
    }

    /// See [`CacheStore::get`].
    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.store.lock().get(key)
    }

    /// See [`CacheStore::has`].
    pub fn has(&self, key: &str) -> bool {
        self.inner.store.lock().has(key)
    }

    /// See [`CacheStore::delete`].
    pub fn delete(&self, key: &str) -> bool {
        self.inner.store.lock().delete(key)
    }

    /// See [`CacheStore::invalidate_by_tag`].
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        self.inner.store.lock().invalidate_by_tag(tag)
    }

    /// See [`CacheStore::invalidate_by_pattern`].
    pub fn invalidate_by_pattern(&self, pattern: &Regex) -> usize {
        self.inner.store.lock().invalidate_by_pattern(pattern)
    }

    /// See [`CacheStore::cleanup_expired`].
    pub fn cleanup_expired(&self) -> usize {
        self.inner.store.lock().cleanup_expired()
    }

    /// See [`CacheStore::clear`].
    pub fn clear(&self) {
        self.inner.store.lock().clear();
    }

    /// See [`CacheStore::stats`].
    pub fn stats(&self) -> CacheStats {
        self.inner.store.lock().stats()
    }

    /// Cloned entry metadata, without counting an access.
    pub fn entry(&self, key: &str) -> Option<CacheEntry<V>> {
        self.inner.store.lock().entry(key).cloned()
    }

    /// Number of live and not-yet-swept entries.
    pub fn len(&self) -> usize {
        self.inner.store.lock().len()
    }

    /// Returns true if the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.inner.store.lock().is_empty()
    }

    // == Get Or Fetch ==
    /// Returns the cached value for `key`, or runs `producer`, caches its
    /// output and returns it.
    ///
    /// At most one producer runs per key at a time. Callers arriving while a
    /// producer is running wait for it and then read its result from the
    /// cache; if it failed, the next waiter runs its own producer.
    /// Producer errors are returned untouched and nothing is cached.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        options: FetchOptions,
        producer: F,
    ) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        if !options.force_refresh {
            if let Some(value) = self.get(key) {
                return Ok(value);
            }
        }

        let gate = {
            let mut in_flight = self.inner.in_flight.lock();
            Arc::clone(
                in_flight
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };

        let result = {
            let (_guard, waited) = match gate.try_lock() {
                Ok(guard) => (guard, false),
                Err(_) => {
                    debug!(key, "Waiting for in-flight fetch");
                    (gate.lock().await, true)
                }
            };

            // A producer that finished while we waited already refreshed the entry
            let cached = if waited { self.get(key) } else { None };
            match cached {
                Some(value) => Ok(value),
                None => {
                    let produced = producer().await;
                    if let Ok(value) = &produced {
                        let set_options = SetOptions {
                            ttl_ms: options.ttl_ms,
                            tags: options.tags.clone(),
                            version: None,
                        };
                        if let Err(err) = self.set(key, value.clone(), set_options) {
                            warn!(key, error = %err, "Fetched value could not be cached");
                        }
                    }
                    produced
                }
            }
        };

        self.release_gate(key, &gate);
        result
    }

    fn release_gate(&self, key: &str, gate: &Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self.inner.in_flight.lock();
        // Map + our clone; anyone else still holds or awaits the gate
        if Arc::strong_count(gate) <= 2 {
            in_flight.remove(key);
        }
    }

    /// Number of keys with a producer running or queued.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::cache::CacheConfig;

    fn cache() -> SharedCache<String> {
        SharedCache::new(CacheStore::new(CacheConfig::default()))
    }

    #[tokio::test]
    async fn test_get_or_fetch_hit_skips_producer() {
        let cache = cache();
        cache
            .set("k", "cached".to_string(), SetOptions::default())
            .unwrap();
        let calls = AtomicUsize::new(0);

        let value: std::result::Result<String, String> = cache
            .get_or_fetch("k", FetchOptions::default(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("fresh".to_string())
            })
            .await;

        assert_eq!(value.unwrap(), "cached");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_get_or_fetch_miss_stores_result() {
        let cache = cache();

        let value: std::result::Result<String, String> = cache
            .get_or_fetch(
                "k",
                FetchOptions {
                    tags: vec!["t".to_string()],
                    ..FetchOptions::default()
                },
                || async { Ok("fresh".to_string()) },
            )
            .await;

        assert_eq!(value.unwrap(), "fresh");
        assert_eq!(cache.get("k"), Some("fresh".to_string()));
        assert_eq!(cache.invalidate_by_tag("t"), 1);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_force_refresh_runs_producer() {
        let cache = cache();
        cache
            .set("k", "old".to_string(), SetOptions::default())
            .unwrap();

        let value: std::result::Result<String, String> = cache
            .get_or_fetch(
                "k",
                FetchOptions {
                    force_refresh: true,
                    ..FetchOptions::default()
                },
                || async { Ok("new".to_string()) },
            )
            .await;

        assert_eq!(value.unwrap(), "new");
        assert_eq!(cache.get("k"), Some("new".to_string()));
    }

    #[tokio::test]
    async fn test_producer_error_is_not_cached() {
        let cache = cache();

        let value: std::result::Result<String, String> = cache
            .get_or_fetch("k", FetchOptions::default(), || async {
                Err("backend down".to_string())
            })
            .await;

        assert_eq!(value.unwrap_err(), "backend down");
        assert!(!cache.has("k"));
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_misses_run_one_producer() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("shared", FetchOptions::default(), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, String>("value".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "value");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
    }
}
