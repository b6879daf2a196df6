//! TTL Sweep Task
//!
//! Background task that periodically removes expired cache entries, so
//! stale entries nobody reads again are still reclaimed.

use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::SharedCache;

/// Spawns a background task that periodically sweeps expired cache entries.
///
/// The task runs until aborted, sleeping for `interval` between sweeps.
/// The store lock is only held for the duration of a single sweep.
///
/// # Example
/// ```ignore
/// let cache = SharedCache::new(CacheStore::new(CacheConfig::default()));
/// let sweep_handle = spawn_cleanup_task(cache.clone(), Duration::from_secs(60));
/// // Later, during shutdown:
/// sweep_handle.abort();
/// ```
pub fn spawn_cleanup_task<V>(cache: SharedCache<V>, interval: Duration) -> JoinHandle<()>
where
    V: Clone + Serialize + DeserializeOwned + Send + 'static,
{
    tokio::spawn(async move {
        info!(
            "Starting TTL sweep task with interval of {} ms",
            interval.as_millis()
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.cleanup_expired();

            if removed > 0 {
                info!("TTL sweep: removed {} expired entries", removed);
            } else {
                debug!("TTL sweep: no expired entries found");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::{CacheConfig, CacheStore, SetOptions};
    use crate::clock::ManualClock;

    fn cache_with_clock() -> (SharedCache<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let store = CacheStore::with_clock(CacheConfig::default(), clock.clone());
        (SharedCache::new(store), clock)
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_entries_without_access() {
        let (cache, clock) = cache_with_clock();
        cache
            .set("expire_soon", "value".to_string(), SetOptions::ttl(10))
            .unwrap();
        clock.advance(11);

        let handle = spawn_cleanup_task(cache.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;

        // entry() does not check expiry, so only the sweep can have removed it
        assert!(cache.entry("expire_soon").is_none());
        handle.abort();
    }

    #[tokio::test]
    async fn test_sweep_preserves_valid_entries() {
        let (cache, _) = cache_with_clock();
        cache
            .set("long_lived", "value".to_string(), SetOptions::ttl(3_600_000))
            .unwrap();

        let handle = spawn_cleanup_task(cache.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(cache.get("long_lived"), Some("value".to_string()));
        handle.abort();
    }

    #[tokio::test]
    async fn test_sweep_task_can_be_aborted() {
        let (cache, _) = cache_with_clock();

        let handle = spawn_cleanup_task(cache, Duration::from_millis(20));
        handle.abort();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
