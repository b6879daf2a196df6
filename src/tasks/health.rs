//! Health Monitor Task
//!
//! Periodically samples cache effectiveness, channel liveness and offline
//! backlog, logging degraded conditions. It observes only; recovery is left
//! to the channel's own reconnect logic.

use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::cache::CacheStats;
use crate::realtime::{ChannelStatus, ConnectionState, RealtimeClient};
use crate::state::AppStore;

/// Hit ratio under which the cache is reported as ineffective.
pub const LOW_HIT_RATIO: f64 = 0.5;

/// Lookups needed before the hit ratio is judged.
pub const MIN_LOOKUPS: u64 = 20;

// == Health Report ==
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub hit_ratio: f64,
    pub cache: CacheStats,
    pub channel: ChannelStatus,
    pub online: bool,
    pub queue_length: usize,
    /// Human-readable degraded conditions; empty when healthy
    pub degraded: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.degraded.is_empty()
    }
}

// == Health Probe ==
/// Reads health signals from the running components.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    api: ApiClient,
    realtime: RealtimeClient,
    store: AppStore,
}

impl HealthProbe {
    pub fn new(api: ApiClient, realtime: RealtimeClient, store: AppStore) -> Self {
        Self {
            api,
            realtime,
            store,
        }
    }

    /// Takes one sample.
    pub fn sample(&self) -> HealthReport {
        let cache = self.api.cache().stats();
        let hit_ratio = cache.hit_ratio();
        let channel = self.realtime.status();
        let online = self.api.is_online();
        let queue_length = self.api.queue_len();
        let signed_in = self.store.get_state().session.authenticated;

        let mut degraded = Vec::new();
        let lookups = cache.total_hits + cache.total_misses;
        if lookups >= MIN_LOOKUPS && hit_ratio < LOW_HIT_RATIO {
            degraded.push(format!(
                "cache hit ratio {hit_ratio:.2} is below {LOW_HIT_RATIO:.2}"
            ));
        }
        if channel.enabled && signed_in && channel.state != ConnectionState::Open {
            degraded.push(format!(
                "real-time channel is {:?} while signed in",
                channel.state
            ));
        }
        if !online {
            degraded.push(format!("offline with {queue_length} queued request(s)"));
        }

        HealthReport {
            hit_ratio,
            cache,
            channel,
            online,
            queue_length,
            degraded,
        }
    }
}

/// Spawns a background task that samples `probe` every `interval`.
///
/// The task runs until aborted.
pub fn spawn_health_monitor(probe: HealthProbe, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting health monitor with interval of {} ms",
            interval.as_millis()
        );

        loop {
            tokio::time::sleep(interval).await;

            let report = probe.sample();
            if report.is_healthy() {
                debug!(hit_ratio = report.hit_ratio, "Health check passed");
            } else {
                for condition in &report.degraded {
                    warn!("Health check degraded: {}", condition);
                }
            }
        }
    })
}
