//! Caching Transport
//!
//! A [`Transport`] decorator that routes GETs under the API prefix through
//! the client's cached path. Anything else, or a failure on the cached path,
//! goes straight to the wrapped transport.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::api::{is_api_path, ApiClient, ApiRequest, Method, RawResponse, RequestOptions, Transport};
use crate::error::Result;

pub struct CachingTransport {
    inner: Arc<dyn Transport>,
    client: ApiClient,
}

impl std::fmt::Debug for CachingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingTransport")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl CachingTransport {
    /// Wraps `inner`. `client` must send through `inner` (or another
    /// undecorated transport), never through this decorator.
    pub fn new(inner: Arc<dyn Transport>, client: ApiClient) -> Self {
        Self { inner, client }
    }

    fn is_cacheable(&self, request: &ApiRequest) -> bool {
        request.method == Method::Get
            && is_api_path(&request.path, &self.client.config().api_prefix)
    }
}

#[async_trait]
impl Transport for CachingTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<RawResponse> {
        if !self.is_cacheable(request) {
            return self.inner.execute(request).await;
        }
        match self
            .client
            .request(request.clone(), RequestOptions::default())
            .await
        {
            Ok(response) => Ok(RawResponse::ok(response.data.to_string())),
            Err(err) => {
                debug!(path = %request.path, error = %err, "Cached path failed; calling through");
                self.inner.execute(request).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::api::ApiConfig;
    use crate::cache::{CacheConfig, CacheStore, SharedCache};
    use crate::state::{AppState, StateContainer};

    /// Counts calls; paths containing "broken" fail with a 404.
    #[derive(Default)]
    struct CountingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn execute(&self, request: &ApiRequest) -> Result<RawResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if request.path.contains("broken") {
                return Ok(RawResponse {
                    status: 404,
                    body: "gone".to_string(),
                });
            }
            Ok(RawResponse::ok(json!({ "call": n }).to_string()))
        }
    }

    fn decorated() -> (CachingTransport, Arc<CountingTransport>) {
        let network = Arc::new(CountingTransport::default());
        let client = ApiClient::new(
            ApiConfig::default(),
            network.clone(),
            SharedCache::new(CacheStore::new(CacheConfig::default())),
            StateContainer::new(AppState::default()),
        );
        (CachingTransport::new(network.clone(), client), network)
    }

    #[tokio::test]
    async fn test_api_gets_are_cached() {
        let (transport, network) = decorated();
        let request = ApiRequest::get("/api/announcements");

        let first = transport.execute(&request).await.unwrap();
        let second = transport.execute(&request).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(network.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_requests_pass_through() {
        let (transport, network) = decorated();

        transport.execute(&ApiRequest::get("/static/app.js")).await.unwrap();
        transport.execute(&ApiRequest::get("/static/app.js")).await.unwrap();
        transport
            .execute(&ApiRequest::new(Method::Post, "/api/announcements"))
            .await
            .unwrap();

        assert_eq!(network.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_direct_call() {
        let (transport, network) = decorated();

        let raw = transport
            .execute(&ApiRequest::get("/api/broken"))
            .await
            .unwrap();

        // The direct call returns the raw 404 instead of a client error
        assert_eq!(raw.status, 404);
        assert_eq!(network.calls.load(Ordering::SeqCst), 2);
    }
}
