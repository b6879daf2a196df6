//! Request and Response models for the diagnostics API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{InvalidatePatternRequest, MAX_PATTERN_LENGTH};
pub use responses::{
    CacheEntryResponse, ErrorResponse, HealthResponse, InvalidateResponse, StatsResponse,
};
