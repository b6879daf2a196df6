//! Diagnostics Routes
//!
//! Configures the Axum router with all diagnostics endpoints.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    entry_handler, health_handler, invalidate_pattern_handler, invalidate_tag_handler,
    stats_handler, DiagnosticsState,
};

/// Creates the diagnostics router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Health sample
/// - `GET /stats` - Cache, channel and queue statistics
/// - `GET /cache/:key` - Entry metadata
/// - `DELETE /cache/tags/:tag` - Invalidate by tag
/// - `POST /cache/invalidate` - Invalidate by key pattern
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: DiagnosticsState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/cache/invalidate", post(invalidate_pattern_handler))
        .route("/cache/tags/:tag", delete(invalidate_tag_handler))
        .route("/cache/:key", get(entry_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    use super::*;
    use crate::api::{ApiRequest, RawResponse, Transport};
    use crate::cache::SetOptions;
    use crate::clock::system_clock;
    use crate::config::Config;
    use crate::error::Result;
    use crate::integration::{Components, Integration};
    use crate::persistence::MemoryBackend;
    use crate::realtime::WebSocketConnector;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn execute(&self, _request: &ApiRequest) -> Result<RawResponse> {
            Ok(RawResponse::ok("null"))
        }
    }

    fn create_test_app() -> (Router, DiagnosticsState) {
        let components = Components {
            backend: Arc::new(MemoryBackend::new()),
            transport: Arc::new(NullTransport),
            connector: Arc::new(WebSocketConnector),
            clock: system_clock(),
        };
        let integration = Integration::new(Config::default(), components).unwrap();
        let state = DiagnosticsState::from_integration(&integration);
        (create_router(state.clone()), state)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let (app, _) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["queueLength"], 0);
        assert_eq!(body["channel"]["enabled"], json!(true));
    }

    #[tokio::test]
    async fn test_entry_endpoint() {
        let (app, state) = create_test_app();
        state
            .cache
            .set("announcements", json!(["hello"]), SetOptions::default())
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/cache/announcements")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["value"], json!(["hello"]));
    }

    #[tokio::test]
    async fn test_entry_not_found() {
        let (app, _) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/cache/nonexistent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("nonexistent"));
    }

    #[tokio::test]
    async fn test_invalidate_tag_endpoint() {
        let (app, state) = create_test_app();
        state
            .cache
            .set("a", json!(1), SetOptions::default().with_tags(["users"]))
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/cache/tags/users")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["removed"], 1);
        assert!(state.cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_pattern_bad_request() {
        let (app, _) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/cache/invalidate")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"pattern":""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
