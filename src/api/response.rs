//! Response handling
//!
//! JSON body parsing with a single recovery pass for bodies that carry
//! leading diagnostic text before the JSON document.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SyncError};

/// Characters of raw body kept in parse errors.
pub const SNIPPET_LEN: usize = 200;

// == Api Response ==
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub data: Value,
    /// Served from the local cache
    pub from_cache: bool,
    /// Served from the cache after the network failed
    pub stale: bool,
}

impl ApiResponse {
    pub fn fresh(data: Value) -> Self {
        Self {
            data,
            from_cache: false,
            stale: false,
        }
    }

    pub fn cached(data: Value) -> Self {
        Self {
            data,
            from_cache: true,
            stale: false,
        }
    }

    pub fn stale(data: Value) -> Self {
        Self {
            data,
            from_cache: true,
            stale: true,
        }
    }
}

// == Body Parsing ==
/// Parses a response body as JSON. An empty body is `null`.
///
/// On failure, leading lines are dropped up to the first line starting with
/// `{` or `[` and the rest is parsed once more.
pub fn parse_body(raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    let first_error = match serde_json::from_str::<Value>(raw) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    match cleanse(raw) {
        Some(cleaned) => serde_json::from_str::<Value>(cleaned)
            .map(|value| {
                debug!("Recovered JSON body after stripping leading lines");
                value
            })
            .map_err(|err| parse_error(err, raw)),
        None => Err(parse_error(first_error, raw)),
    }
}

/// Returns the body from the first line that looks like the start of JSON.
fn cleanse(raw: &str) -> Option<&str> {
    let mut offset = 0;
    for line in raw.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return Some(&raw[offset..]);
        }
        offset += line.len();
    }
    None
}

fn parse_error(err: serde_json::Error, raw: &str) -> SyncError {
    SyncError::Parse {
        message: err.to_string(),
        snippet: snippet(raw),
    }
}

/// First [`SNIPPET_LEN`] characters of `raw`.
pub(crate) fn snippet(raw: &str) -> String {
    raw.chars().take(SNIPPET_LEN).collect()
}
