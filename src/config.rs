//! Configuration Module
//!
//! Handles loading and managing sync-layer configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::api::ApiConfig;
use crate::background::BackgroundConfig;
use crate::cache::{CacheConfig, EvictionPolicy};
use crate::realtime::RealtimeConfig;

/// Sync-layer configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of entries the response cache can hold
    pub cache_max_entries: usize,
    /// Default TTL in milliseconds for entries without explicit TTL
    pub cache_default_ttl_ms: u64,
    /// Eviction policy applied when the cache is full
    pub eviction_policy: EvictionPolicy,
    /// Mirror cache entries to durable storage
    pub cache_persist: bool,
    /// Key prefix for persisted cache entries
    pub cache_persistence_prefix: String,
    /// File used as durable medium; in-memory when unset
    pub persistence_path: Option<PathBuf>,
    /// Expired-entry sweep interval in seconds
    pub cleanup_interval: u64,
    /// Origin of the backend, e.g. `https://intranet.example.com`
    pub api_base_url: String,
    /// Path prefix under which API endpoints live
    pub api_prefix: String,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Retry attempts after the first failure
    pub max_retries: u32,
    /// Base delay for request retry backoff in milliseconds
    pub retry_base_delay_ms: u64,
    /// Queue mutating requests while offline
    pub offline_queue: bool,
    /// Runtime switch for the real-time channel
    pub realtime_enabled: bool,
    /// Base reconnect delay in milliseconds
    pub reconnect_base_delay_ms: u64,
    /// Upper bound for the reconnect delay in milliseconds
    pub reconnect_max_delay_ms: u64,
    /// Consecutive reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Heartbeat ping interval in milliseconds
    pub heartbeat_interval_ms: u64,
    /// Delay between login and channel connect in milliseconds
    pub connect_delay_ms: u64,
    /// Register the background replay worker
    pub background_sync_enabled: bool,
    /// Asset paths precached when background sync is enabled
    pub critical_assets: Vec<String>,
    /// Health sampling interval in seconds
    pub health_interval: u64,
    /// Diagnostics HTTP server port
    pub diagnostics_port: u16,
    /// Storage key for persisted application state
    pub state_persist_key: String,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `PORTAL_CACHE_MAX_ENTRIES` - Maximum cache entries (default: 500)
    /// - `PORTAL_CACHE_TTL_MS` - Default TTL in ms (default: 300000)
    /// - `PORTAL_EVICTION_POLICY` - `lru`, `lfu` or `fifo` (default: lru)
    /// - `PORTAL_CACHE_PERSIST` - Mirror entries to storage (default: false)
    /// - `PORTAL_CACHE_PREFIX` - Persisted key prefix (default: `portal_cache_`)
    /// - `PORTAL_PERSISTENCE_PATH` - JSON file for durable storage (default: unset)
    /// - `PORTAL_CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 60)
    /// - `PORTAL_API_BASE_URL` - Backend origin (default: `http://localhost:8080`)
    /// - `PORTAL_API_PREFIX` - API path prefix (default: `/api`)
    /// - `PORTAL_REQUEST_TIMEOUT_MS` - Request timeout (default: 10000)
    /// - `PORTAL_MAX_RETRIES` - Retry attempts (default: 3)
    /// - `PORTAL_RETRY_BASE_MS` - Retry backoff base (default: 1000)
    /// - `PORTAL_OFFLINE_QUEUE` - Queue writes while offline (default: true)
    /// - `PORTAL_REALTIME_ENABLED` - Real-time channel switch (default: true)
    /// - `PORTAL_RECONNECT_BASE_MS` / `PORTAL_RECONNECT_MAX_MS` (default: 1000 / 30000)
    /// - `PORTAL_MAX_RECONNECT_ATTEMPTS` - (default: 5)
    /// - `PORTAL_HEARTBEAT_MS` - Ping interval (default: 30000)
    /// - `PORTAL_CONNECT_DELAY_MS` - Login-to-connect delay (default: 1000)
    /// - `PORTAL_BACKGROUND_SYNC` - Register background replay (default: false)
    /// - `PORTAL_CRITICAL_ASSETS` - Comma separated asset paths
    /// - `PORTAL_HEALTH_INTERVAL` - Health sampling in seconds (default: 60)
    /// - `PORTAL_DIAGNOSTICS_PORT` - Diagnostics server port (default: 3000)
    /// - `PORTAL_STATE_KEY` - Persisted state key (default: `portal_state`)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_max_entries: env_or("PORTAL_CACHE_MAX_ENTRIES", defaults.cache_max_entries),
            cache_default_ttl_ms: env_or("PORTAL_CACHE_TTL_MS", defaults.cache_default_ttl_ms),
            eviction_policy: env_or("PORTAL_EVICTION_POLICY", defaults.eviction_policy),
            cache_persist: env_or("PORTAL_CACHE_PERSIST", defaults.cache_persist),
            cache_persistence_prefix: env::var("PORTAL_CACHE_PREFIX")
                .unwrap_or(defaults.cache_persistence_prefix),
            persistence_path: env::var("PORTAL_PERSISTENCE_PATH").ok().map(PathBuf::from),
            cleanup_interval: env_or("PORTAL_CLEANUP_INTERVAL", defaults.cleanup_interval),
            api_base_url: env::var("PORTAL_API_BASE_URL").unwrap_or(defaults.api_base_url),
            api_prefix: env::var("PORTAL_API_PREFIX").unwrap_or(defaults.api_prefix),
            request_timeout_ms: env_or("PORTAL_REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
            max_retries: env_or("PORTAL_MAX_RETRIES", defaults.max_retries),
            retry_base_delay_ms: env_or("PORTAL_RETRY_BASE_MS", defaults.retry_base_delay_ms),
            offline_queue: env_or("PORTAL_OFFLINE_QUEUE", defaults.offline_queue),
            realtime_enabled: env_or("PORTAL_REALTIME_ENABLED", defaults.realtime_enabled),
            reconnect_base_delay_ms: env_or(
                "PORTAL_RECONNECT_BASE_MS",
                defaults.reconnect_base_delay_ms,
            ),
            reconnect_max_delay_ms: env_or("PORTAL_RECONNECT_MAX_MS", defaults.reconnect_max_delay_ms),
            max_reconnect_attempts: env_or(
                "PORTAL_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            heartbeat_interval_ms: env_or("PORTAL_HEARTBEAT_MS", defaults.heartbeat_interval_ms),
            connect_delay_ms: env_or("PORTAL_CONNECT_DELAY_MS", defaults.connect_delay_ms),
            background_sync_enabled: env_or(
                "PORTAL_BACKGROUND_SYNC",
                defaults.background_sync_enabled,
            ),
            critical_assets: env::var("PORTAL_CRITICAL_ASSETS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(defaults.critical_assets),
            health_interval: env_or("PORTAL_HEALTH_INTERVAL", defaults.health_interval),
            diagnostics_port: env_or("PORTAL_DIAGNOSTICS_PORT", defaults.diagnostics_port),
            state_persist_key: env::var("PORTAL_STATE_KEY").unwrap_or(defaults.state_persist_key),
        }
    }

    // == Derived Component Configs ==
    /// Cache store settings.
    pub fn cache(&self) -> CacheConfig {
        CacheConfig {
            default_ttl_ms: self.cache_default_ttl_ms,
            max_size: self.cache_max_entries,
            eviction_policy: self.eviction_policy,
            persist: self.cache_persist,
            persistence_prefix: self.cache_persistence_prefix.clone(),
        }
    }

    /// HTTP client settings.
    pub fn api(&self) -> ApiConfig {
        ApiConfig {
            base_url: self.api_base_url.clone(),
            api_prefix: self.api_prefix.clone(),
            timeout: Duration::from_millis(self.request_timeout_ms),
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            offline_queue: self.offline_queue,
        }
    }

    /// Real-time channel settings.
    pub fn realtime(&self) -> RealtimeConfig {
        RealtimeConfig {
            enabled: self.realtime_enabled,
            reconnect_base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            reconnect_max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            connect_delay: Duration::from_millis(self.connect_delay_ms),
        }
    }

    /// Background durability settings.
    pub fn background(&self) -> BackgroundConfig {
        BackgroundConfig {
            enabled: self.background_sync_enabled,
            critical_assets: self.critical_assets.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_max_entries: 500,
            cache_default_ttl_ms: 300_000,
            eviction_policy: EvictionPolicy::Lru,
            cache_persist: false,
            cache_persistence_prefix: "portal_cache_".to_string(),
            persistence_path: None,
            cleanup_interval: 60,
            api_base_url: "http://localhost:8080".to_string(),
            api_prefix: "/api".to_string(),
            request_timeout_ms: 10_000,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            offline_queue: true,
            realtime_enabled: true,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 5,
            heartbeat_interval_ms: 30_000,
            connect_delay_ms: 1_000,
            background_sync_enabled: false,
            critical_assets: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
            ],
            health_interval: 60,
            diagnostics_port: 3000,
            state_persist_key: "portal_state".to_string(),
        }
    }
}

/// Parses an environment variable, falling back to `default` when unset or malformed.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
