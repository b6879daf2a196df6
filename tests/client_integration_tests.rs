//! Integration Tests for the HTTP Client Layer
//!
//! Drives `ApiClient` over `ReqwestTransport` against an in-process axum
//! backend bound to an ephemeral port.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use portal_sync::{
    api::{ApiConfig, ReqwestTransport},
    cache::CacheConfig,
    state::Severity,
    ApiClient, CacheStore, RequestOptions, SharedCache, StateContainer, SyncError,
};
use serde_json::{json, Value};

// == Test Backend ==

#[derive(Clone, Default)]
struct Backend {
    document_hits: Arc<AtomicUsize>,
    flaky_hits: Arc<AtomicUsize>,
    created: Arc<AtomicUsize>,
}

async fn documents(State(backend): State<Backend>) -> Json<Value> {
    let n = backend.document_hits.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!([{ "id": 1, "title": "Handbook", "served": n }]))
}

/// JSON preceded by lines a proxy or framework might inject.
async fn legacy() -> &'static str {
    "while(1);\n<!-- cached by gateway -->\n{\"ok\":true,\"items\":[1,2]}"
}

async fn garbage() -> &'static str {
    "<html>maintenance</html>"
}

/// Answers once, then fails with 503.
async fn flaky(State(backend): State<Backend>) -> (StatusCode, String) {
    if backend.flaky_hits.fetch_add(1, Ordering::SeqCst) == 0 {
        (StatusCode::OK, json!({ "version": 1 }).to_string())
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "overloaded".to_string())
    }
}

async fn create_announcement(
    State(backend): State<Backend>,
    Json(mut body): Json<Value>,
) -> Json<Value> {
    let id = backend.created.fetch_add(1, Ordering::SeqCst) + 100;
    body["id"] = json!(id);
    Json(body)
}

async fn spawn_backend() -> (SocketAddr, Backend) {
    let backend = Backend::default();
    let app = Router::new()
        .route("/api/documents", get(documents))
        .route("/api/legacy", get(legacy))
        .route("/api/garbage", get(garbage))
        .route("/api/flaky", get(flaky))
        .route("/api/announcements", post(create_announcement))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, backend)
}

fn client_for(addr: SocketAddr) -> ApiClient {
    let base_url = format!("http://{addr}");
    let config = ApiConfig {
        base_url: base_url.clone(),
        max_retries: 2,
        retry_base_delay: Duration::from_millis(10),
        timeout: Duration::from_secs(5),
        ..ApiConfig::default()
    };
    let transport = ReqwestTransport::new(base_url, Duration::from_secs(2)).unwrap();
    ApiClient::new(
        config,
        Arc::new(transport),
        SharedCache::new(CacheStore::new(CacheConfig::default())),
        StateContainer::new(Default::default()),
    )
}

// == Cache-First Reads ==

#[tokio::test]
async fn test_second_get_is_served_from_cache() {
    let (addr, backend) = spawn_backend().await;
    let client = client_for(addr);

    let first = client.get("/documents", RequestOptions::default()).await.unwrap();
    let second = client.get("/documents", RequestOptions::default()).await.unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.data, second.data);
    assert_eq!(backend.document_hits.load(Ordering::SeqCst), 1);
    assert!(client.cache().has("GET:/api/documents"));
}

#[tokio::test]
async fn test_no_cache_always_hits_network() {
    let (addr, backend) = spawn_backend().await;
    let client = client_for(addr);

    client.get("/documents", RequestOptions::default().no_cache()).await.unwrap();
    client.get("/documents", RequestOptions::default().no_cache()).await.unwrap();

    assert_eq!(backend.document_hits.load(Ordering::SeqCst), 2);
}

// == Body Cleansing ==

#[tokio::test]
async fn test_leading_noise_is_stripped() {
    let (addr, _) = spawn_backend().await;
    let client = client_for(addr);

    let response = client.get("/legacy", RequestOptions::default()).await.unwrap();

    assert_eq!(response.data, json!({ "ok": true, "items": [1, 2] }));
}

#[tokio::test]
async fn test_body_without_json_is_a_parse_error() {
    let (addr, _) = spawn_backend().await;
    let client = client_for(addr);

    let err = client
        .get("/garbage", RequestOptions::default())
        .await
        .unwrap_err();

    match err {
        SyncError::Parse { snippet, .. } => assert!(snippet.contains("maintenance")),
        other => panic!("expected parse error, got {other:?}"),
    }
}

// == Retry And Stale Fallback ==

#[tokio::test]
async fn test_stale_data_served_after_retries_exhausted() {
    let (addr, backend) = spawn_backend().await;
    let client = client_for(addr);

    let fresh = client.get("/flaky", RequestOptions::default()).await.unwrap();
    let stale = client
        .get("/flaky", RequestOptions::default().no_cache())
        .await
        .unwrap();

    assert_eq!(fresh.data, json!({ "version": 1 }));
    assert!(stale.stale);
    assert_eq!(stale.data, fresh.data);
    // One success, then the first failure plus two retries
    assert_eq!(backend.flaky_hits.load(Ordering::SeqCst), 4);
    let state = client.store().get_state();
    assert!(state
        .ui
        .notifications
        .iter()
        .any(|n| n.severity == Severity::Warning));
}

#[tokio::test]
async fn test_retry_exhausted_without_cache_fails() {
    let (addr, backend) = spawn_backend().await;
    let client = client_for(addr);
    backend.flaky_hits.store(1, Ordering::SeqCst);

    let err = client
        .get("/flaky", RequestOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Http { status: 503, .. }));
    assert_eq!(backend.flaky_hits.load(Ordering::SeqCst), 4);
}

// == Offline Queue ==

#[tokio::test]
async fn test_offline_post_settles_after_reconnect() {
    let (addr, backend) = spawn_backend().await;
    let client = client_for(addr);
    client.set_online(false);

    let pending = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .post("/announcements", json!({ "title": "Picnic" }), RequestOptions::default())
                .await
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pending.is_finished());
    assert_eq!(client.queue_len(), 1);
    assert_eq!(backend.created.load(Ordering::SeqCst), 0);

    client.set_online(true);
    let response = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(response.data["title"], "Picnic");
    assert_eq!(response.data["id"], 100);
    assert_eq!(backend.created.load(Ordering::SeqCst), 1);
    assert_eq!(client.queue_len(), 0);
}

#[tokio::test]
async fn test_write_invalidates_cached_listing() {
    let (addr, _) = spawn_backend().await;
    let client = client_for(addr);
    client
        .cache()
        .set(
            "GET:/api/announcements",
            json!([]),
            portal_sync::SetOptions::default().with_tags(["announcements"]),
        )
        .unwrap();

    client
        .post("/announcements", json!({ "title": "Hello" }), RequestOptions::default())
        .await
        .unwrap();

    assert!(!client.cache().has("GET:/api/announcements"));
}
