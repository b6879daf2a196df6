//! Request types
//!
//! Outbound request snapshot and per-call options.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// == Method ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Returns true for methods that change server state.
    pub fn is_mutating(self) -> bool {
        !matches!(self, Method::Get)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Api Request ==
/// Everything needed to send (or later replay) a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: Method,
    /// Absolute path including the API prefix, with optional query
    pub path: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Cache key for GET responses.
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.method, self.path)
    }
}

// == Request Options ==
/// Per-call behavior switches.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    /// Serve GETs from the cache and store fresh results
    pub cache: bool,
    /// Cache TTL; the cache default when unset
    pub ttl_ms: Option<u64>,
    /// Explicit cache tags; inferred from the path when unset
    pub tags: Option<Vec<String>>,
    pub retry: bool,
    /// Overrides the client-wide retry count
    pub max_retries: Option<u32>,
    /// Queue mutating calls while offline
    pub queue_offline: bool,
    /// Insert a placeholder record into the resource slice before sending
    pub optimistic: bool,
    /// Overrides the client-wide timeout
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            cache: true,
            ttl_ms: None,
            tags: None,
            retry: true,
            max_retries: None,
            queue_offline: true,
            optimistic: false,
            timeout: None,
        }
    }
}

impl RequestOptions {
    pub fn no_cache(mut self) -> Self {
        self.cache = false;
        self
    }

    pub fn ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn no_retry(mut self) -> Self {
        self.retry = false;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn no_queue(mut self) -> Self {
        self.queue_offline = false;
        self
    }

    pub fn optimistic(mut self) -> Self {
        self.optimistic = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_get_is_safe() {
        assert!(!Method::Get.is_mutating());
        for method in [Method::Post, Method::Put, Method::Patch, Method::Delete] {
            assert!(method.is_mutating());
        }
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(
            ApiRequest::get("/api/documents?page=2").cache_key(),
            "GET:/api/documents?page=2"
        );
    }

    #[test]
    fn test_headers_do_not_change_cache_key() {
        let request = ApiRequest::get("/api/documents").with_header("X-Portal-Tab", "3");

        assert_eq!(request.headers, vec![("X-Portal-Tab".to_string(), "3".to_string())]);
        assert_eq!(request.cache_key(), "GET:/api/documents");
    }

    #[test]
    fn test_options_builder() {
        let options = RequestOptions::default()
            .no_cache()
            .ttl(1_000)
            .tags(["documents"])
            .optimistic();

        assert!(!options.cache);
        assert_eq!(options.ttl_ms, Some(1_000));
        assert_eq!(options.tags, Some(vec!["documents".to_string()]));
        assert!(options.optimistic);
        assert!(options.retry);
        assert!(options.queue_offline);
    }
}
