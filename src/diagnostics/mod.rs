//! Diagnostics Module
//!
//! HTTP handlers and routing for inspecting a running sync layer.
//!
//! # Endpoints
//! - `GET /health` - Health sample with degraded conditions
//! - `GET /stats` - Cache, channel and offline queue statistics
//! - `GET /cache/:key` - Entry metadata
//! - `DELETE /cache/tags/:tag` - Invalidate entries by tag
//! - `POST /cache/invalidate` - Invalidate entries whose key matches a pattern

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
