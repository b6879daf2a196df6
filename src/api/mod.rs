//! API Module
//!
//! HTTP client layer between the portal and its backend.
//!
//! # Behavior
//! - GETs are served from the shared cache when present
//! - Failed sends are retried with exponential backoff
//! - Writes invalidate the cache tags inferred from their path
//! - Writes made while offline are queued and replayed in order

pub mod client;
pub mod queue;
pub mod request;
pub mod response;
pub mod tags;
pub mod transport;

use std::time::Duration;

pub use client::{ApiClient, OPTIMISTIC_FLAG};
pub use queue::{OfflineQueue, Placeholder, QueuedRequest};
pub use request::{ApiRequest, Method, RequestOptions};
pub use response::{parse_body, ApiResponse};
pub use tags::{infer_tags, is_api_path, resource_name};
pub use transport::{RawResponse, ReqwestTransport, Transport};

/// Upper bound for a single retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

// == Api Config ==
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Backend origin, e.g. `https://intranet.example.com`
    pub base_url: String,
    /// Path prefix of API endpoints
    pub api_prefix: String,
    pub timeout: Duration,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Queue writes while offline
    pub offline_queue: bool,
}

impl ApiConfig {
    /// Delay before retry `attempt` (1-based): `base * 2^(attempt - 1)`,
    /// capped at [`MAX_RETRY_DELAY`].
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base_delay
            .saturating_mul(factor)
            .min(MAX_RETRY_DELAY)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        crate::Config::default().api()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles() {
        let config = ApiConfig::default();
        assert_eq!(config.retry_delay(1), Duration::from_millis(1_000));
        assert_eq!(config.retry_delay(2), Duration::from_millis(2_000));
        assert_eq!(config.retry_delay(3), Duration::from_millis(4_000));
        assert_eq!(config.retry_delay(40), MAX_RETRY_DELAY);
    }
}
