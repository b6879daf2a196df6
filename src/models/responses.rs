//! Response DTOs for the diagnostics API
//!
//! Defines the structure of outgoing HTTP response bodies.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::cache::{CacheEntry, CacheStats};
use crate::realtime::ChannelStatus;
use crate::tasks::HealthReport;

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
    /// Degraded conditions, empty when healthy
    pub degraded: Vec<String>,
}

impl HealthResponse {
    /// Creates a HealthResponse from a health sample
    pub fn from_report(report: &HealthReport) -> Self {
        let status = if report.is_healthy() {
            "healthy"
        } else {
            "degraded"
        };
        Self {
            status: status.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            degraded: report.degraded.clone(),
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub cache: CacheStats,
    /// hits / (hits + misses)
    pub hit_rate: f64,
    pub channel: ChannelStatus,
    pub online: bool,
    pub queue_length: usize,
}

impl StatsResponse {
    pub fn from_report(report: HealthReport) -> Self {
        Self {
            hit_rate: report.hit_ratio,
            cache: report.cache,
            channel: report.channel,
            online: report.online,
            queue_length: report.queue_length,
        }
    }
}

/// Response body for entry inspection (GET /cache/:key)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntryResponse {
    pub key: String,
    pub value: Value,
    pub created_at: u64,
    pub expires_at: u64,
    pub ttl_remaining_ms: u64,
    /// True if the entry is expired but not yet swept
    pub expired: bool,
    pub version: String,
    pub tags: BTreeSet<String>,
    pub access_count: u64,
}

impl CacheEntryResponse {
    /// Creates a CacheEntryResponse from an entry observed at `now_ms`
    pub fn new(entry: CacheEntry<Value>, now_ms: u64, access_count: u64) -> Self {
        Self {
            ttl_remaining_ms: entry.ttl_remaining_ms(now_ms),
            expired: entry.is_expired(now_ms),
            key: entry.key,
            value: entry.value,
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            version: entry.version,
            tags: entry.tags,
            access_count,
        }
    }
}

/// Response body for tag and pattern invalidation
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    /// Success message
    pub message: String,
    /// Number of entries removed
    pub removed: usize,
}

impl InvalidateResponse {
    /// Creates a new InvalidateResponse for `target` (tag or pattern)
    pub fn new(target: impl AsRef<str>, removed: usize) -> Self {
        Self {
            message: format!("Invalidated {} entries for '{}'", removed, target.as_ref()),
            removed,
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::realtime::ConnectionState;

    fn report(degraded: Vec<String>) -> HealthReport {
        HealthReport {
            hit_ratio: 0.75,
            cache: CacheStats::new(100),
            channel: ChannelStatus {
                state: ConnectionState::Closed,
                enabled: true,
                reconnect_attempts: 0,
                connections_opened: 0,
                last_error: None,
            },
            online: true,
            queue_length: 2,
            degraded,
        }
    }

    #[test]
    fn test_health_response_healthy() {
        let resp = HealthResponse::from_report(&report(Vec::new()));
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(resp.status, "healthy");
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn test_health_response_degraded() {
        let resp = HealthResponse::from_report(&report(vec!["offline".to_string()]));
        assert_eq!(resp.status, "degraded");
        assert_eq!(resp.degraded, vec!["offline".to_string()]);
    }

    #[test]
    fn test_stats_response_serialize() {
        let resp = StatsResponse::from_report(report(Vec::new()));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["hitRate"], json!(0.75));
        assert_eq!(json["queueLength"], json!(2));
        assert_eq!(json["cache"]["maxSize"], json!(100));
        assert_eq!(json["channel"]["state"], json!("closed"));
    }

    #[test]
    fn test_entry_response_ttl() {
        let entry = CacheEntry::new("k", json!(1), 1_000, 500, BTreeSet::new(), "1");

        let live = CacheEntryResponse::new(entry.clone(), 1_200, 3);
        assert_eq!(live.ttl_remaining_ms, 300);
        assert!(!live.expired);
        assert_eq!(live.access_count, 3);

        let stale = CacheEntryResponse::new(entry, 1_500, 0);
        assert_eq!(stale.ttl_remaining_ms, 0);
        assert!(stale.expired);
    }

    #[test]
    fn test_invalidate_response_serialize() {
        let resp = InvalidateResponse::new("documents", 4);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("documents"));
        assert!(json.contains("\"removed\":4"));
    }

    #[test]
    fn test_error_response_serialize() {
        let resp = ErrorResponse::new("Something went wrong");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("error"));
        assert!(json.contains("Something went wrong"));
    }
}
