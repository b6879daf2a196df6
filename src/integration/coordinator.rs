//! Integration Coordinator
//!
//! Builds the sync layer from one [`Config`] and wires the components
//! together: channel events invalidate cache tags and state slices, the
//! session drives the channel, and the sweep and health tasks run in the
//! background until shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ReqwestTransport, Transport};
use crate::background::BackgroundSync;
use crate::cache::{CacheStore, SharedCache};
use crate::clock::{system_clock, SharedClock};
use crate::config::Config;
use crate::error::Result;
use crate::integration::CachingTransport;
use crate::persistence::{FileBackend, MemoryBackend, SharedBackend};
use crate::realtime::message::{DATA_UPDATED, NEW_MESSAGE};
use crate::realtime::{channel_url, ChannelEvent, Connector, RealtimeClient, WebSocketConnector};
use crate::state::{AppState, AppStore, StateContainer, Subscription};
use crate::tasks::{spawn_cleanup_task, spawn_health_monitor, HealthProbe};

/// Cache tag covering message listings.
pub const MESSAGES_TAG: &str = "messages";

// == Components ==
/// External collaborators the sync layer is built on.
#[derive(Clone)]
pub struct Components {
    pub backend: SharedBackend,
    pub transport: Arc<dyn Transport>,
    pub connector: Arc<dyn Connector>,
    pub clock: SharedClock,
}

impl Components {
    /// Production collaborators: file or in-memory storage, reqwest and
    /// WebSocket.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend: SharedBackend = match &config.persistence_path {
            Some(path) => Arc::new(FileBackend::open(path)?),
            None => Arc::new(MemoryBackend::new()),
        };
        let transport = ReqwestTransport::new(
            config.api_base_url.clone(),
            Duration::from_millis(config.request_timeout_ms),
        )?;
        Ok(Self {
            backend,
            transport: Arc::new(transport),
            connector: Arc::new(WebSocketConnector),
            clock: system_clock(),
        })
    }
}

// == Integration ==
pub struct Integration {
    config: Config,
    cache: SharedCache<Value>,
    store: AppStore,
    api: ApiClient,
    realtime: RealtimeClient,
    background: BackgroundSync,
    transport: Arc<dyn Transport>,
    initialized: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl std::fmt::Debug for Integration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Integration")
            .field("initialized", &self.is_initialized())
            .field("api", &self.api)
            .field("realtime", &self.realtime)
            .finish_non_exhaustive()
    }
}

impl Integration {
    /// Builds every component. Nothing runs until [`Self::initialize`].
    pub fn new(config: Config, components: Components) -> Result<Self> {
        let Components {
            backend,
            transport,
            connector,
            clock,
        } = components;

        let cache = SharedCache::new(CacheStore::with_persistence(
            config.cache(),
            clock,
            backend.clone(),
        ));
        let store = StateContainer::persistent(
            AppState::default(),
            backend.clone(),
            config.state_persist_key.clone(),
        );
        let api = ApiClient::new(config.api(), transport.clone(), cache.clone(), store.clone());
        let realtime = RealtimeClient::new(
            channel_url(&config.api_base_url)?,
            config.realtime(),
            connector,
            store.clone(),
        );
        let background = BackgroundSync::new(config.background(), backend, transport.clone());

        Ok(Self {
            config,
            cache,
            store,
            api,
            realtime,
            background,
            transport,
            initialized: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Builds the sync layer with production collaborators.
    pub fn from_config(config: Config) -> Result<Self> {
        let components = Components::from_config(&config)?;
        Self::new(config, components)
    }

    // == Initialize ==
    /// Wires components and starts background tasks. Returns false if
    /// already initialized or called outside a tokio runtime.
    pub fn initialize(&self) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available; sync layer not initialized");
            return false;
        };
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("Sync layer already initialized");
            return false;
        }

        let invalidate_resource = {
            let cache = self.cache.clone();
            let store = self.store.clone();
            self.realtime.subscribe(DATA_UPDATED, move |message| {
                if let ChannelEvent::DataUpdated(update) = &message.event {
                    let removed = cache.invalidate_by_tag(&update.resource);
                    store.mark_slice_stale(&update.resource);
                    debug!(resource = %update.resource, removed, "Remote update invalidated cache");
                }
                Ok(())
            })
        };
        let invalidate_messages = {
            let cache = self.cache.clone();
            self.realtime.subscribe(NEW_MESSAGE, move |_| {
                cache.invalidate_by_tag(MESSAGES_TAG);
                Ok(())
            })
        };
        self.subscriptions
            .lock()
            .extend([invalidate_resource, invalidate_messages]);

        self.realtime.watch_session();

        let mut tasks = vec![
            spawn_cleanup_task(
                self.cache.clone(),
                Duration::from_secs(self.config.cleanup_interval.max(1)),
            ),
            spawn_health_monitor(
                self.health_probe(),
                Duration::from_secs(self.config.health_interval.max(1)),
            ),
        ];
        if self.config.background_sync_enabled {
            let background = self.background.clone();
            tasks.push(runtime.spawn(async move {
                background.initialize().await;
            }));
        }
        self.tasks.lock().extend(tasks);

        info!(
            realtime = self.realtime.is_enabled(),
            background = self.config.background_sync_enabled,
            "Sync layer initialized"
        );
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    // == Shutdown ==
    /// Stops background tasks, unwires handlers and closes the channel.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        for subscription in self.subscriptions.lock().drain(..) {
            subscription.unsubscribe();
        }
        self.realtime.unwatch_session();
        self.realtime.disconnect();
        self.initialized.store(false, Ordering::SeqCst);
        info!("Sync layer shut down");
    }

    // == Connectivity ==
    /// Propagates connectivity to the API client and the background manager.
    pub fn set_online(&self, online: bool) {
        self.api.set_online(online);
        if !online {
            self.background.notify_offline();
            return;
        }
        let background = self.background.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    background.notify_online().await;
                });
            }
            Err(_) => debug!("No async runtime; background replay skipped"),
        }
    }

    // == Accessors ==
    /// Transport decorator routing API GETs through the cache.
    pub fn caching_transport(&self) -> CachingTransport {
        CachingTransport::new(self.transport.clone(), self.api.clone())
    }

    pub fn health_probe(&self) -> HealthProbe {
        HealthProbe::new(self.api.clone(), self.realtime.clone(), self.store.clone())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &SharedCache<Value> {
        &self.cache
    }

    pub fn store(&self) -> &AppStore {
        &self.store
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn realtime(&self) -> &RealtimeClient {
        &self.realtime
    }

    pub fn background(&self) -> &BackgroundSync {
        &self.background
    }

    /// Number of running background tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.lock().iter().filter(|task| !task.is_finished()).count()
    }
}

impl Drop for Integration {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::api::{ApiRequest, RawResponse};
    use crate::cache::SetOptions;
    use crate::realtime::Connection;

    struct StaticTransport;

    #[async_trait]
    impl Transport for StaticTransport {
        async fn execute(&self, _request: &ApiRequest) -> Result<RawResponse> {
            Ok(RawResponse::ok("[]"))
        }
    }

    type ServerEnd = (mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>);

    /// Hands the server side of each connection to the test.
    struct LoopbackConnector {
        servers: mpsc::UnboundedSender<ServerEnd>,
    }

    #[async_trait]
    impl Connector for LoopbackConnector {
        async fn connect(&self, _url: &str) -> Result<Connection> {
            let (outbound, from_client) = mpsc::unbounded_channel();
            let (to_client, inbound) = mpsc::unbounded_channel();
            let _ = self.servers.send((to_client, from_client));
            Ok(Connection { outbound, inbound })
        }
    }

    fn build() -> (Integration, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, accepted) = mpsc::unbounded_channel();
        let components = Components {
            backend: Arc::new(MemoryBackend::new()),
            transport: Arc::new(StaticTransport),
            connector: Arc::new(LoopbackConnector { servers }),
            clock: system_clock(),
        };
        let integration = Integration::new(Config::default(), components).unwrap();
        (integration, accepted)
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (integration, _) = build();

        assert!(integration.initialize());
        assert!(!integration.initialize());
        assert_eq!(integration.task_count(), 2);
        assert_eq!(integration.realtime().handler_count(DATA_UPDATED), 1);

        integration.shutdown();
        assert!(!integration.is_initialized());
        assert!(!integration.realtime().has_handlers(DATA_UPDATED));
        assert!(!integration.realtime().has_handlers(NEW_MESSAGE));
    }

    #[test]
    fn test_initialize_outside_runtime_is_refused() {
        let (integration, _) = build();

        assert!(!integration.initialize());
        assert!(!integration.is_initialized());
        assert_eq!(integration.task_count(), 0);
        assert!(!integration.realtime().has_handlers(DATA_UPDATED));
    }

    #[tokio::test]
    async fn test_data_updated_invalidates_tag_and_slice() {
        let (integration, mut accepted) = build();
        integration.initialize();

        let cache = integration.cache();
        cache
            .set(
                "GET:/api/documents",
                json!([{ "id": 1 }]),
                SetOptions::default().with_tags(["documents"]),
            )
            .unwrap();
        cache
            .set("GET:/api/users", json!([]), SetOptions::default().with_tags(["users"]))
            .unwrap();
        integration.store().set_slice("documents", vec![json!({ "id": 1 })]);

        integration.realtime().connect();
        let (server, _client_frames) = accepted.recv().await.unwrap();
        server
            .send(json!({ "type": "data_updated", "payload": { "resource": "documents" } }).to_string())
            .unwrap();

        eventually(|| !cache.has("GET:/api/documents")).await;
        assert!(cache.has("GET:/api/users"));
        assert!(integration.store().is_slice_stale("documents"));
        integration.shutdown();
    }

    #[tokio::test]
    async fn test_new_message_invalidates_messages() {
        let (integration, mut accepted) = build();
        integration.initialize();
        integration
            .cache()
            .set(
                "GET:/api/messages",
                json!([]),
                SetOptions::default().with_tags([MESSAGES_TAG]),
            )
            .unwrap();

        integration.realtime().connect();
        let (server, _client_frames) = accepted.recv().await.unwrap();
        server
            .send(json!({ "type": "new_message" }).to_string())
            .unwrap();

        eventually(|| !integration.cache().has("GET:/api/messages")).await;
        assert_eq!(integration.store().get_state().realtime.unread_count, 1);
        integration.shutdown();
    }

    #[tokio::test]
    async fn test_caching_transport_shares_cache() {
        let (integration, _) = build();
        let transport = integration.caching_transport();

        transport
            .execute(&ApiRequest::get("/api/documents"))
            .await
            .unwrap();

        assert!(integration.cache().has("GET:/api/documents"));
    }

    #[tokio::test]
    async fn test_set_online_reaches_api_client() {
        let (integration, _) = build();

        integration.set_online(false);
        assert!(!integration.api().is_online());
        assert!(!integration.background().is_online());

        integration.set_online(true);
        assert!(integration.api().is_online());
    }
}
