//! Portal Sync - client-side cache and synchronization layer for the intranet portal
//!
//! Provides a TTL/tag response cache with LRU, LFU and FIFO eviction, an HTTP
//! client with retry and offline queueing, an observable state container, a
//! real-time invalidation channel and background replay of deferred writes.

pub mod api;
pub mod background;
pub mod cache;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod integration;
pub mod models;
pub mod persistence;
pub mod realtime;
pub mod state;
pub mod tasks;

pub use api::{ApiClient, ApiRequest, ApiResponse, Method, RequestOptions};
pub use cache::{CacheStore, EvictionPolicy, SetOptions, SharedCache};
pub use config::Config;
pub use diagnostics::{create_router, DiagnosticsState};
pub use error::{Result, SyncError};
pub use integration::{CachingTransport, Components, Integration};
pub use realtime::RealtimeClient;
pub use state::{AppState, AppStore, StateContainer, SyncHub};
pub use tasks::spawn_cleanup_task;
