//! Diagnostics Handlers
//!
//! HTTP request handlers for each diagnostics endpoint.

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use crate::cache::SharedCache;
use crate::error::{Result, SyncError};
use crate::integration::Integration;
use crate::models::{
    CacheEntryResponse, HealthResponse, InvalidatePatternRequest, InvalidateResponse,
    StatsResponse,
};
use crate::tasks::HealthProbe;

/// Application state shared across all handlers.
///
/// Handles are cheap clones of the running components.
#[derive(Debug, Clone)]
pub struct DiagnosticsState {
    pub probe: HealthProbe,
    pub cache: SharedCache<Value>,
}

impl DiagnosticsState {
    pub fn new(probe: HealthProbe, cache: SharedCache<Value>) -> Self {
        Self { probe, cache }
    }

    /// Creates a DiagnosticsState observing `integration`.
    pub fn from_integration(integration: &Integration) -> Self {
        Self::new(integration.health_probe(), integration.cache().clone())
    }
}

/// Handler for GET /health
///
/// Always answers 200; degraded conditions are listed in the body.
pub async fn health_handler(State(state): State<DiagnosticsState>) -> Json<HealthResponse> {
    let report = state.probe.sample();
    Json(HealthResponse::from_report(&report))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<DiagnosticsState>) -> Json<StatsResponse> {
    Json(StatsResponse::from_report(state.probe.sample()))
}

/// Handler for GET /cache/:key
///
/// Inspects an entry without counting an access. Expired entries that have
/// not been swept yet are reported with `expired: true`.
pub async fn entry_handler(
    State(state): State<DiagnosticsState>,
    Path(key): Path<String>,
) -> Result<Json<CacheEntryResponse>> {
    let found = state.cache.with_store(|store| {
        let entry = store.entry(&key).cloned()?;
        let accesses = store.access_count(&key).unwrap_or(0);
        Some(CacheEntryResponse::new(entry, store.now_ms(), accesses))
    });

    found.map(Json).ok_or(SyncError::NotFound(key))
}

/// Handler for DELETE /cache/tags/:tag
pub async fn invalidate_tag_handler(
    State(state): State<DiagnosticsState>,
    Path(tag): Path<String>,
) -> Json<InvalidateResponse> {
    let removed = state.cache.invalidate_by_tag(&tag);
    Json(InvalidateResponse::new(tag, removed))
}

/// Handler for POST /cache/invalidate
pub async fn invalidate_pattern_handler(
    State(state): State<DiagnosticsState>,
    Json(req): Json<InvalidatePatternRequest>,
) -> Result<Json<InvalidateResponse>> {
    let pattern = req.compile()?;
    let removed = state.cache.invalidate_by_pattern(&pattern);
    Ok(Json(InvalidateResponse::new(req.pattern, removed)))
}
