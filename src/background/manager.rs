//! Background Sync Manager
//!
//! Mutations handed to [`BackgroundSync::background_sync`] are written to
//! durable storage first, so they survive a restart, then replayed through
//! the transport. A record is removed only after a successful replay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::response::snippet;
use crate::api::{ApiRequest, Transport};
use crate::background::BackgroundConfig;
use crate::cache::{CacheConfig, CacheStore, SetOptions, SharedCache};
use crate::clock::current_timestamp_ms;
use crate::error::{Result, SyncError};
use crate::persistence::{PersistenceError, SharedBackend};

/// Storage key prefix of durable sync records.
pub const SYNC_PREFIX: &str = "background-sync-";

/// Tag carried by every precached asset.
pub const ASSET_TAG: &str = "static-assets";

/// Precached assets live until explicitly invalidated (one year).
const ASSET_TTL_MS: u64 = 365 * 24 * 60 * 60 * 1_000;

const SIGNAL_BUFFER_SIZE: usize = 32;

// == Sync Record ==
/// A mutation waiting for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub tag: String,
    pub request: ApiRequest,
    pub created_at: u64,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

// == Sync Signal ==
/// Outcome of one replay, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncSignal {
    Succeeded { tag: String },
    Failed { tag: String, error: String },
}

/// Totals of a replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub succeeded: usize,
    pub failed: usize,
}

struct Inner {
    config: BackgroundConfig,
    backend: SharedBackend,
    transport: Arc<dyn Transport>,
    assets: SharedCache<String>,
    signals: broadcast::Sender<SyncSignal>,
    online: AtomicBool,
    initialized: AtomicBool,
    /// One replay pass at a time
    replay: tokio::sync::Mutex<()>,
}

// == Background Sync ==
#[derive(Clone)]
pub struct BackgroundSync {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BackgroundSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundSync")
            .field("enabled", &self.inner.config.enabled)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl BackgroundSync {
    pub fn new(config: BackgroundConfig, backend: SharedBackend, transport: Arc<dyn Transport>) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_BUFFER_SIZE);
        let assets = SharedCache::new(CacheStore::new(CacheConfig {
            default_ttl_ms: ASSET_TTL_MS,
            max_size: config.critical_assets.len().max(1),
            ..CacheConfig::default()
        }));
        Self {
            inner: Arc::new(Inner {
                config,
                backend,
                transport,
                assets,
                signals,
                online: AtomicBool::new(true),
                initialized: AtomicBool::new(false),
                replay: tokio::sync::Mutex::new(()),
            }),
        }
    }

    // == Initialize ==
    /// Precaches the critical assets and replays records left by a previous
    /// run. Returns false when disabled; later calls are no-ops.
    pub async fn initialize(&self) -> bool {
        if !self.inner.config.enabled {
            debug!("Background sync disabled");
            return false;
        }
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return true;
        }

        let cached = self.precache_assets().await;
        info!(
            cached,
            total = self.inner.config.critical_assets.len(),
            "Background sync registered"
        );

        let leftover = self.pending().len();
        if leftover > 0 && self.is_online() {
            info!(leftover, "Replaying records from a previous run");
            self.replay_all().await;
        }
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    async fn precache_assets(&self) -> usize {
        let mut cached = 0;
        for path in &self.inner.config.critical_assets {
            let request = ApiRequest::get(path.clone());
            match self.inner.transport.execute(&request).await {
                Ok(raw) if raw.is_success() => {
                    let options = SetOptions::ttl(ASSET_TTL_MS).with_tags([ASSET_TAG]);
                    match self.inner.assets.set(path.clone(), raw.body, options) {
                        Ok(()) => cached += 1,
                        Err(err) => warn!(path = %path, error = %err, "Asset not cached"),
                    }
                }
                Ok(raw) => warn!(path = %path, status = raw.status, "Asset precache failed"),
                Err(err) => warn!(path = %path, error = %err, "Asset precache failed"),
            }
        }
        cached
    }

    /// Precached body of a critical asset.
    pub fn asset(&self, path: &str) -> Option<String> {
        self.inner.assets.get(path)
    }

    // == Register Sync ==
    /// Durably records `request` under `tag`, then replays it if online.
    ///
    /// A later call with the same tag replaces the pending record. Fails with
    /// `SyncError::Storage` when the record cannot be written; nothing is sent
    /// in that case.
    pub async fn background_sync(&self, tag: &str, request: ApiRequest) -> Result<()> {
        if tag.is_empty() {
            return Err(SyncError::InvalidRequest("sync tag cannot be empty".to_string()));
        }
        if !request.method.is_mutating() {
            return Err(SyncError::InvalidRequest(format!(
                "only mutations can be synced in the background, got {}",
                request.method
            )));
        }
        let record = SyncRecord {
            tag: tag.to_string(),
            request,
            created_at: current_timestamp_ms(),
            attempts: 0,
            last_error: None,
        };
        self.write_record(&record)?;
        debug!(tag, "Background sync registered");

        if self.is_online() {
            self.replay_tag(tag).await;
        }
        Ok(())
    }

    // == Replay ==
    /// Records connectivity restoration and replays every pending record.
    pub async fn notify_online(&self) -> ReplaySummary {
        self.inner.online.store(true, Ordering::SeqCst);
        self.replay_all().await
    }

    /// Records loss of connectivity; replays wait for [`Self::notify_online`].
    pub fn notify_offline(&self) {
        self.inner.online.store(false, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Replays every pending record once.
    pub async fn replay_all(&self) -> ReplaySummary {
        let _replaying = self.inner.replay.lock().await;
        let mut summary = ReplaySummary::default();
        let tags: Vec<String> = self.pending().into_iter().map(|record| record.tag).collect();
        for tag in tags {
            match self.replay_one(&tag).await {
                Some(true) => summary.succeeded += 1,
                Some(false) => summary.failed += 1,
                None => {}
            }
        }
        if summary.succeeded + summary.failed > 0 {
            info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                "Background replay finished"
            );
        }
        summary
    }

    /// Replays the record for `tag`. Returns `None` if there is none.
    pub async fn replay_tag(&self, tag: &str) -> Option<bool> {
        let _replaying = self.inner.replay.lock().await;
        self.replay_one(tag).await
    }

    async fn replay_one(&self, tag: &str) -> Option<bool> {
        let mut record = self.read_record(tag)?;
        let outcome = match self.inner.transport.execute(&record.request).await {
            Ok(raw) if raw.is_success() => Ok(()),
            Ok(raw) => Err(SyncError::Http {
                status: raw.status,
                body: snippet(&raw.body),
            }),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                self.remove_record(tag);
                info!(tag, "Background sync succeeded");
                let _ = self.inner.signals.send(SyncSignal::Succeeded {
                    tag: tag.to_string(),
                });
                Some(true)
            }
            Err(err) => {
                record.attempts += 1;
                record.last_error = Some(err.to_string());
                if let Err(write_err) = self.write_record(&record) {
                    warn!(tag, error = %write_err, "Failed to update sync record");
                }
                warn!(tag, attempts = record.attempts, error = %err, "Background sync failed; record kept");
                let _ = self.inner.signals.send(SyncSignal::Failed {
                    tag: tag.to_string(),
                    error: err.to_string(),
                });
                Some(false)
            }
        }
    }

    // == Inspection ==
    /// Durable records awaiting replay, oldest first.
    pub fn pending(&self) -> Vec<SyncRecord> {
        let keys = match self.inner.backend.keys_with_prefix(SYNC_PREFIX) {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "Failed to list background sync records");
                return Vec::new();
            }
        };
        let mut records: Vec<SyncRecord> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(SYNC_PREFIX))
            .filter_map(|tag| self.read_record(tag))
            .collect();
        records.sort_by_key(|record| record.created_at);
        records
    }

    /// Receiver for replay outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncSignal> {
        self.inner.signals.subscribe()
    }

    // == Storage ==
    fn storage_key(tag: &str) -> String {
        format!("{SYNC_PREFIX}{tag}")
    }

    fn read_record(&self, tag: &str) -> Option<SyncRecord> {
        let key = Self::storage_key(tag);
        match self.inner.backend.read(&key) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(key = %key, error = %err, "Discarding undecodable sync record");
                    self.remove_record(tag);
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key = %key, error = %err, "Failed to read sync record");
                None
            }
        }
    }

    fn write_record(&self, record: &SyncRecord) -> std::result::Result<(), PersistenceError> {
        let key = Self::storage_key(&record.tag);
        serde_json::to_string(record)
            .map_err(PersistenceError::from)
            .and_then(|raw| self.inner.backend.write(&key, &raw))
    }

    fn remove_record(&self, tag: &str) {
        if let Err(err) = self.inner.backend.remove(&Self::storage_key(tag)) {
            warn!(tag, error = %err, "Failed to remove sync record");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::api::{Method, RawResponse};
    use crate::persistence::{MemoryBackend, PersistenceBackend};

    /// Answers per path; unknown paths fail with a network error.
    #[derive(Default)]
    struct PathTransport {
        responses: Mutex<HashMap<String, RawResponse>>,
        sent: Mutex<Vec<String>>,
    }

    impl PathTransport {
        fn respond(&self, path: &str, status: u16, body: &str) {
            self.responses.lock().insert(
                path.to_string(),
                RawResponse {
                    status,
                    body: body.to_string(),
                },
            );
        }
    }

    #[async_trait]
    impl Transport for PathTransport {
        async fn execute(&self, request: &ApiRequest) -> Result<RawResponse> {
            self.sent.lock().push(request.path.clone());
            self.responses
                .lock()
                .get(&request.path)
                .cloned()
                .ok_or_else(|| SyncError::Network("unreachable".to_string()))
        }
    }

    fn enabled_config() -> BackgroundConfig {
        BackgroundConfig {
            enabled: true,
            critical_assets: vec!["/".to_string(), "/manifest.json".to_string()],
        }
    }

    fn post(path: &str) -> ApiRequest {
        ApiRequest::new(Method::Post, path).with_body(json!({ "body": "hi" }))
    }

    #[tokio::test]
    async fn test_disabled_initialize_is_noop() {
        let transport = Arc::new(PathTransport::default());
        let sync = BackgroundSync::new(
            BackgroundConfig::default(),
            Arc::new(MemoryBackend::new()),
            transport.clone(),
        );

        assert!(!sync.initialize().await);
        assert!(!sync.is_initialized());
        assert!(transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_precaches_assets() {
        let transport = Arc::new(PathTransport::default());
        transport.respond("/", 200, "<html></html>");
        let sync = BackgroundSync::new(
            enabled_config(),
            Arc::new(MemoryBackend::new()),
            transport.clone(),
        );

        assert!(sync.initialize().await);
        assert!(sync.initialize().await);

        assert_eq!(sync.asset("/").as_deref(), Some("<html></html>"));
        assert!(sync.asset("/manifest.json").is_none());
        // Second initialize did not fetch again
        assert_eq!(transport.sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_successful_replay_removes_record() {
        let transport = Arc::new(PathTransport::default());
        transport.respond("/api/messages", 201, "{}");
        let backend = MemoryBackend::new();
        let sync = BackgroundSync::new(enabled_config(), Arc::new(backend.clone()), transport);
        let mut signals = sync.subscribe();

        sync.background_sync("outbox", post("/api/messages")).await.unwrap();

        assert_eq!(
            signals.recv().await.unwrap(),
            SyncSignal::Succeeded {
                tag: "outbox".to_string()
            }
        );
        assert!(sync.pending().is_empty());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_failed_replay_keeps_record() {
        let transport = Arc::new(PathTransport::default());
        let sync = BackgroundSync::new(
            enabled_config(),
            Arc::new(MemoryBackend::new()),
            transport.clone(),
        );
        let mut signals = sync.subscribe();

        sync.background_sync("outbox", post("/api/messages")).await.unwrap();

        assert!(matches!(
            signals.recv().await.unwrap(),
            SyncSignal::Failed { ref tag, .. } if tag == "outbox"
        ));
        let pending = sync.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert!(pending[0].last_error.is_some());

        // Connectivity returns and the backend accepts it
        transport.respond("/api/messages", 200, "{}");
        let summary = sync.notify_online().await;
        assert_eq!(
            summary,
            ReplaySummary {
                succeeded: 1,
                failed: 0
            }
        );
        assert!(sync.pending().is_empty());
    }

    #[tokio::test]
    async fn test_offline_records_wait_for_online() {
        let transport = Arc::new(PathTransport::default());
        transport.respond("/api/a", 200, "{}");
        transport.respond("/api/b", 200, "{}");
        let sync = BackgroundSync::new(
            enabled_config(),
            Arc::new(MemoryBackend::new()),
            transport.clone(),
        );
        sync.notify_offline();

        sync.background_sync("a", post("/api/a")).await.unwrap();
        sync.background_sync("b", post("/api/b")).await.unwrap();
        assert_eq!(sync.pending().len(), 2);
        assert!(transport.sent.lock().is_empty());

        let summary = sync.notify_online().await;
        assert_eq!(summary.succeeded, 2);
        assert_eq!(*transport.sent.lock(), vec!["/api/a", "/api/b"]);
    }

    #[tokio::test]
    async fn test_records_survive_restart() {
        let backend = MemoryBackend::new();
        {
            let sync = BackgroundSync::new(
                enabled_config(),
                Arc::new(backend.clone()),
                Arc::new(PathTransport::default()),
            );
            sync.notify_offline();
            sync.background_sync("draft", post("/api/drafts")).await.unwrap();
        }

        let transport = Arc::new(PathTransport::default());
        transport.respond("/api/drafts", 200, "{}");
        let restarted = BackgroundSync::new(enabled_config(), Arc::new(backend), transport.clone());

        assert_eq!(restarted.pending().len(), 1);
        restarted.initialize().await;
        assert!(restarted.pending().is_empty());
        assert!(transport.sent.lock().contains(&"/api/drafts".to_string()));
    }

    #[tokio::test]
    async fn test_rejects_bad_registrations() {
        let sync = BackgroundSync::new(
            enabled_config(),
            Arc::new(MemoryBackend::new()),
            Arc::new(PathTransport::default()),
        );

        assert!(sync.background_sync("", post("/api/a")).await.is_err());
        assert!(sync
            .background_sync("read", ApiRequest::get("/api/a"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unwritable_record_is_reported() {
        let transport = Arc::new(PathTransport::default());
        transport.respond("/api/posts", 201, "{}");
        let sync = BackgroundSync::new(
            enabled_config(),
            Arc::new(MemoryBackend::with_quota(0)),
            transport.clone(),
        );

        let result = sync.background_sync("save-post", post("/api/posts")).await;

        assert!(matches!(result, Err(SyncError::Storage(_))));
        assert!(transport.sent.lock().is_empty());
        assert!(sync.pending().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_record_is_purged() {
        let backend = MemoryBackend::new();
        backend.write("background-sync-broken", "{not json").unwrap();
        let sync = BackgroundSync::new(
            enabled_config(),
            Arc::new(backend.clone()),
            Arc::new(PathTransport::default()),
        );

        assert!(sync.pending().is_empty());
        assert!(backend.is_empty());
    }
}
