//! API Client
//!
//! Cache-first reads, retried sends with exponential backoff, tag
//! invalidation on writes, offline queuing with ordered replay and
//! optimistic placeholder records.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::api::queue::{OfflineQueue, Placeholder};
use crate::api::request::{ApiRequest, Method, RequestOptions};
use crate::api::response::{parse_body, snippet, ApiResponse};
use crate::api::tags::{infer_tags, is_api_path, resource_name};
use crate::api::transport::Transport;
use crate::api::ApiConfig;
use crate::cache::{FetchOptions, SharedCache};
use crate::clock::current_timestamp_ms;
use crate::error::{Result, SyncError};
use crate::state::{record_id, AppStore, Severity};

/// Marker field set on placeholder records.
pub const OPTIMISTIC_FLAG: &str = "_optimistic";

struct Inner {
    config: ApiConfig,
    transport: Arc<dyn Transport>,
    cache: SharedCache<Value>,
    store: AppStore,
    online: AtomicBool,
    queue: Mutex<OfflineQueue>,
    /// Serializes replays so queued requests go out one at a time
    replay: tokio::sync::Mutex<()>,
}

// == Api Client ==
/// Clonable handle to the HTTP client layer.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.inner.config)
            .field("online", &self.is_online())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Creates an online client.
    pub fn new(
        config: ApiConfig,
        transport: Arc<dyn Transport>,
        cache: SharedCache<Value>,
        store: AppStore,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                cache,
                store,
                online: AtomicBool::new(true),
                queue: Mutex::new(OfflineQueue::new()),
                replay: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &SharedCache<Value> {
        &self.inner.cache
    }

    pub fn store(&self) -> &AppStore {
        &self.inner.store
    }

    /// Absolute request path for `endpoint`; endpoints already under the API
    /// prefix are kept as-is.
    pub fn resolve(&self, endpoint: &str) -> String {
        let prefix = self.inner.config.api_prefix.trim_end_matches('/');
        if is_api_path(endpoint, prefix) {
            endpoint.to_string()
        } else if endpoint.starts_with('/') {
            format!("{prefix}{endpoint}")
        } else {
            format!("{prefix}/{endpoint}")
        }
    }

    // == Verbs ==
    pub async fn get(&self, endpoint: &str, options: RequestOptions) -> Result<ApiResponse> {
        self.request(ApiRequest::new(Method::Get, self.resolve(endpoint)), options)
            .await
    }

    pub async fn post(
        &self,
        endpoint: &str,
        body: Value,
        options: RequestOptions,
    ) -> Result<ApiResponse> {
        let request = ApiRequest::new(Method::Post, self.resolve(endpoint)).with_body(body);
        self.request(request, options).await
    }

    pub async fn put(
        &self,
        endpoint: &str,
        body: Value,
        options: RequestOptions,
    ) -> Result<ApiResponse> {
        let request = ApiRequest::new(Method::Put, self.resolve(endpoint)).with_body(body);
        self.request(request, options).await
    }

    pub async fn patch(
        &self,
        endpoint: &str,
        body: Value,
        options: RequestOptions,
    ) -> Result<ApiResponse> {
        let request = ApiRequest::new(Method::Patch, self.resolve(endpoint)).with_body(body);
        self.request(request, options).await
    }

    pub async fn delete(&self, endpoint: &str, options: RequestOptions) -> Result<ApiResponse> {
        self.request(ApiRequest::new(Method::Delete, self.resolve(endpoint)), options)
            .await
    }

    // == Request ==
    /// Sends `request`, honoring the cache, the offline queue and retries.
    pub async fn request(&self, request: ApiRequest, options: RequestOptions) -> Result<ApiResponse> {
        if !request.path.starts_with('/') {
            return Err(SyncError::InvalidRequest(format!(
                "request path must be absolute: {:?}",
                request.path
            )));
        }

        if request.method.is_mutating()
            && !self.is_online()
            && self.inner.config.offline_queue
            && options.queue_offline
        {
            return self.enqueue(request, options).await;
        }

        match request.method {
            Method::Get if options.cache => self.cached_get(request, options).await,
            Method::Get => match self.send_with_retry(&request, &options).await {
                Ok(data) => Ok(ApiResponse::fresh(data)),
                Err(err) => self.stale_fallback(&request, err),
            },
            _ => self.mutate(request, options).await,
        }
    }

    async fn cached_get(&self, request: ApiRequest, options: RequestOptions) -> Result<ApiResponse> {
        let key = request.cache_key();
        let tags = options
            .tags
            .clone()
            .unwrap_or_else(|| infer_tags(&request.path, &self.inner.config.api_prefix));
        let fetch_options = FetchOptions {
            ttl_ms: options.ttl_ms,
            tags,
            force_refresh: false,
        };

        let fetched = AtomicBool::new(false);
        let result = self
            .inner
            .cache
            .get_or_fetch(&key, fetch_options, || async {
                fetched.store(true, Ordering::Relaxed);
                self.send_with_retry(&request, &options).await
            })
            .await;

        match result {
            Ok(data) if fetched.load(Ordering::Relaxed) => Ok(ApiResponse::fresh(data)),
            Ok(data) => {
                debug!(key = %key, "Served from cache");
                Ok(ApiResponse::cached(data))
            }
            Err(err) => self.stale_fallback(&request, err),
        }
    }

    async fn mutate(&self, request: ApiRequest, options: RequestOptions) -> Result<ApiResponse> {
        let placeholder = self.placeholder_for(&request, &options);
        self.send_mutation(&request, &options, placeholder).await
    }

    /// Sends a write and reconciles the placeholder shown for it, if any.
    async fn send_mutation(
        &self,
        request: &ApiRequest,
        options: &RequestOptions,
        placeholder: Option<Placeholder>,
    ) -> Result<ApiResponse> {
        let result = self.send_with_retry(request, options).await;
        self.invalidate_for(request, options);

        match result {
            Ok(data) => {
                if let Some(Placeholder { slice, temp_id }) = placeholder {
                    self.inner.store.remove_item(&slice, &temp_id);
                    if record_id(&data).is_some() {
                        self.inner.store.upsert_item(slice, data.clone());
                    }
                }
                Ok(ApiResponse::fresh(data))
            }
            Err(err) => {
                if let Some(placeholder) = &placeholder {
                    self.roll_back(placeholder);
                }
                Err(err)
            }
        }
    }

    // == Sending ==
    async fn send_with_retry(&self, request: &ApiRequest, options: &RequestOptions) -> Result<Value> {
        let max_retries = if options.retry {
            options.max_retries.unwrap_or(self.inner.config.max_retries)
        } else {
            0
        };
        let timeout = options.timeout.unwrap_or(self.inner.config.timeout);

        let mut attempt = 0;
        loop {
            match self.send_once(request, timeout).await {
                Ok(data) => return Ok(data),
                Err(err) if err.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    let delay = self.inner.config.retry_delay(attempt);
                    warn!(
                        method = %request.method,
                        path = %request.path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Request failed; retrying"
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once(&self, request: &ApiRequest, timeout: Duration) -> Result<Value> {
        let raw = match tokio::time::timeout(timeout, self.inner.transport.execute(request)).await {
            Ok(result) => result?,
            Err(_) => return Err(SyncError::Timeout(timeout.as_millis() as u64)),
        };
        if !raw.is_success() {
            return Err(SyncError::Http {
                status: raw.status,
                body: snippet(&raw.body),
            });
        }
        parse_body(&raw.body)
    }

    /// Serves a GET from the cache after retries were exhausted.
    fn stale_fallback(&self, request: &ApiRequest, err: SyncError) -> Result<ApiResponse> {
        if !err.is_retryable() {
            return Err(err);
        }
        match self.inner.cache.get(&request.cache_key()) {
            Some(data) => {
                warn!(path = %request.path, error = %err, "Serving cached data after network failure");
                self.inner.store.notify(
                    Severity::Warning,
                    "Showing saved data because the server could not be reached",
                );
                Ok(ApiResponse::stale(data))
            }
            None => Err(err),
        }
    }

    // == Invalidation ==
    fn invalidate_for(&self, request: &ApiRequest, options: &RequestOptions) {
        let prefix = &self.inner.config.api_prefix;
        let mut tags = infer_tags(&request.path, prefix);
        if let Some(explicit) = &options.tags {
            tags.extend(explicit.iter().cloned());
        }
        let removed: usize = tags
            .iter()
            .map(|tag| self.inner.cache.invalidate_by_tag(tag))
            .sum();
        debug!(path = %request.path, ?tags, removed, "Invalidated after write");

        if let Some(resource) = resource_name(&request.path, prefix) {
            self.inner.store.mark_slice_stale(&resource);
        }
    }

    // == Optimistic Updates ==
    /// Inserts a placeholder for optimistic POST/PUT bodies.
    fn placeholder_for(&self, request: &ApiRequest, options: &RequestOptions) -> Option<Placeholder> {
        if !options.optimistic || !matches!(request.method, Method::Post | Method::Put) {
            return None;
        }
        let slice = resource_name(&request.path, &self.inner.config.api_prefix)?;
        let mut record = match &request.body {
            Some(Value::Object(fields)) => fields.clone(),
            _ => Map::new(),
        };
        let temp_id = format!("temp-{}", uuid::Uuid::new_v4());
        record.insert("id".to_string(), Value::String(temp_id.clone()));
        record.insert(OPTIMISTIC_FLAG.to_string(), Value::Bool(true));

        debug!(slice = %slice, temp_id = %temp_id, "Inserted optimistic record");
        self.inner.store.upsert_item(slice.clone(), Value::Object(record));
        Some(Placeholder { slice, temp_id })
    }

    fn roll_back(&self, placeholder: &Placeholder) {
        warn!(slice = %placeholder.slice, temp_id = %placeholder.temp_id, "Rolling back optimistic record");
        self.inner.store.remove_item(&placeholder.slice, &placeholder.temp_id);
    }

    // == Offline Queue ==
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Records connectivity. Going online replays the queue in the background.
    pub fn set_online(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            info!(pending = self.queue_len(), "Back online");
            self.spawn_replay();
        } else if !online && was_online {
            info!("Gone offline; writes will be queued");
        }
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Drops every queued request; their callers fail with `QueueCleared` and
    /// their optimistic records are removed.
    pub fn clear_queue(&self) -> usize {
        let drained = self.inner.queue.lock().drain();
        let cleared = drained.len();
        for entry in drained {
            if let Some(placeholder) = &entry.placeholder {
                self.roll_back(placeholder);
            }
            entry.settle(Err(SyncError::QueueCleared));
        }
        if cleared > 0 {
            info!(cleared, "Cleared offline queue");
        }
        cleared
    }

    async fn enqueue(&self, request: ApiRequest, options: RequestOptions) -> Result<ApiResponse> {
        let (method, path) = (request.method, request.path.clone());
        // Shown while the write waits for connectivity
        let placeholder = self.placeholder_for(&request, &options);
        let (settlement, pending) = {
            let mut queue = self.inner.queue.lock();
            let settlement = queue.push(request, options, current_timestamp_ms(), placeholder);
            (settlement, queue.len())
        };
        info!(method = %method, path = %path, pending, "Queued request while offline");
        self.inner.store.notify(
            Severity::Info,
            "You are offline. Your change will be sent when the connection returns.",
        );

        // Connectivity may have returned between the check and the push
        if self.is_online() {
            self.spawn_replay();
        }

        settlement.await.unwrap_or(Err(SyncError::QueueCleared))
    }

    fn spawn_replay(&self) {
        let client = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    client.replay_queue().await;
                });
            }
            Err(_) => warn!("No async runtime available; offline replay deferred"),
        }
    }

    /// Sends queued requests one at a time in FIFO order, settling each
    /// caller. Stops early if connectivity drops. Returns how many were sent.
    pub async fn replay_queue(&self) -> usize {
        let _replaying = self.inner.replay.lock().await;
        let mut replayed = 0;
        let mut failed = 0;

        loop {
            if !self.is_online() {
                break;
            }
            let Some(entry) = self.inner.queue.lock().pop_front() else {
                break;
            };
            debug!(method = %entry.request.method, path = %entry.request.path, "Replaying queued request");
            let result = self
                .send_mutation(&entry.request, &entry.options, entry.placeholder.clone())
                .await;
            if result.is_err() {
                failed += 1;
            }
            replayed += 1;
            entry.settle(result);
        }

        if replayed > 0 {
            info!(replayed, failed, "Replayed offline queue");
            let message = if failed == 0 {
                format!("{replayed} offline change(s) synced")
            } else {
                format!("{} of {replayed} offline change(s) synced", replayed - failed)
            };
            let severity = if failed == 0 {
                Severity::Success
            } else {
                Severity::Warning
            };
            self.inner.store.notify(severity, message);
        }
        replayed
    }
}
