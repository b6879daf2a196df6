//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL and tag support.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
///
/// This is also the on-disk shape of a persisted entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<V> {
    /// Key the entry is stored under
    pub key: String,
    /// The stored value
    pub value: V,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), always after `created_at`
    pub expires_at: u64,
    /// Informational version label
    #[serde(default)]
    pub version: String,
    /// Tags used for bulk invalidation
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new cache entry that expires `ttl_ms` after `now_ms`.
    pub fn new(
        key: impl Into<String>,
        value: V,
        now_ms: u64,
        ttl_ms: u64,
        tags: BTreeSet<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            created_at: now_ms,
            expires_at: now_ms.saturating_add(ttl_ms),
            version: version.into(),
            tags,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now_ms`.
    ///
    /// An entry is expired once the current time reaches the expiration time.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, zero once expired.
    pub fn ttl_remaining_ms(&self, now_ms: u64) -> u64 {
        self.expires_at.saturating_sub(now_ms)
    }

    /// Returns true if the entry carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn entry(now: u64, ttl: u64) -> CacheEntry<String> {
        CacheEntry::new("k", "v".to_string(), now, ttl, BTreeSet::new(), "1")
    }

    #[test]
    fn test_entry_creation() {
        let entry = entry(1_000, 60_000);

        assert_eq!(entry.value, "v");
        assert_eq!(entry.created_at, 1_000);
        assert_eq!(entry.expires_at, 61_000);
        assert!(entry.expires_at > entry.created_at);
        assert!(!entry.is_expired(1_000));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let entry = entry(1_000, 10);

        assert!(!entry.is_expired(1_009));
        // Expired exactly when the TTL has fully elapsed
        assert!(entry.is_expired(1_010));
        assert!(entry.is_expired(1_011));
    }

    #[test]
    fn test_ttl_remaining() {
        let entry = entry(1_000, 10_000);

        assert_eq!(entry.ttl_remaining_ms(1_000), 10_000);
        assert_eq!(entry.ttl_remaining_ms(6_000), 5_000);
        assert_eq!(entry.ttl_remaining_ms(20_000), 0);
    }

    #[test]
    fn test_has_tag() {
        let tags: BTreeSet<String> = ["users".to_string()].into_iter().collect();
        let entry = CacheEntry::new("k", 1u32, 0, 10, tags, "");

        assert!(entry.has_tag("users"));
        assert!(!entry.has_tag("posts"));
    }

    #[test]
    fn test_persisted_shape_uses_camel_case() {
        let json = serde_json::to_value(entry(5, 5)).unwrap();
        assert_eq!(json["createdAt"], 5);
        assert_eq!(json["expiresAt"], 10);
        assert_eq!(json["key"], "k");
    }
}
