//! Request DTOs for the diagnostics API
//!
//! Defines the structure of incoming HTTP request bodies.

use regex::Regex;
use serde::Deserialize;

use crate::error::{Result, SyncError};

/// Longest accepted invalidation pattern.
pub const MAX_PATTERN_LENGTH: usize = 256;

/// Request body for pattern invalidation (POST /cache/invalidate)
///
/// # Fields
/// - `pattern`: Regular expression matched against cache keys
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidatePatternRequest {
    pub pattern: String,
}

impl InvalidatePatternRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.pattern.is_empty() {
            return Some("Pattern cannot be empty".to_string());
        }
        if self.pattern.len() > MAX_PATTERN_LENGTH {
            return Some(format!(
                "Pattern exceeds maximum length of {MAX_PATTERN_LENGTH} characters"
            ));
        }
        None
    }

    /// Validates and compiles the pattern.
    pub fn compile(&self) -> Result<Regex> {
        if let Some(message) = self.validate() {
            return Err(SyncError::InvalidRequest(message));
        }
        Regex::new(&self.pattern)
            .map_err(|err| SyncError::InvalidRequest(format!("Invalid pattern: {err}")))
    }
}
