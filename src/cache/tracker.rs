//! Access Tracker Module
//!
//! Tracks per-key access metadata and picks eviction victims for the
//! LRU, LFU and FIFO policies.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// == Eviction Policy ==
/// Strategy used to choose the entry to drop when the cache is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently accessed key
    #[default]
    Lru,
    /// Smallest access count, ties go to the earliest inserted key
    Lfu,
    /// Oldest inserted key regardless of access
    Fifo,
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Fifo => "fifo",
        };
        f.write_str(name)
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            other => Err(format!("unknown eviction policy: {other}")),
        }
    }
}

// == Access Tracker ==
/// Tracks access order, insertion order and access counts.
///
/// Both queues hold every tracked key exactly once:
/// - Front = oldest (least recently used / first inserted)
/// - Back = newest
#[derive(Debug, Default)]
pub struct AccessTracker {
    /// Keys by last access time
    recency: VecDeque<String>,
    /// Keys by insertion time
    insertion: VecDeque<String>,
    /// Successful reads per key
    counts: HashMap<String, u64>,
}

impl AccessTracker {
    // == Constructor ==
    /// Creates a new empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Insert ==
    /// Registers a key as freshly inserted, resetting its metadata.
    ///
    /// A replaced key moves to the back of both queues with a zero count.
    pub fn insert(&mut self, key: &str) {
        self.remove(key);
        self.recency.push_back(key.to_string());
        self.insertion.push_back(key.to_string());
        self.counts.insert(key.to_string(), 0);
    }

    // == Touch ==
    /// Records a successful read: bumps the count and marks the key most recent.
    pub fn touch(&mut self, key: &str) {
        if let Some(count) = self.counts.get_mut(key) {
            *count += 1;
            self.recency.retain(|k| k != key);
            self.recency.push_back(key.to_string());
        }
    }

    // == Remove ==
    /// Drops all metadata for a key.
    pub fn remove(&mut self, key: &str) {
        if self.counts.remove(key).is_some() {
            self.recency.retain(|k| k != key);
            self.insertion.retain(|k| k != key);
        }
    }

    // == Select Victim ==
    /// Returns the key the given policy would evict, without removing it.
    pub fn victim(&self, policy: EvictionPolicy) -> Option<&String> {
        match policy {
            EvictionPolicy::Lru => self.recency.front(),
            EvictionPolicy::Fifo => self.insertion.front(),
            EvictionPolicy::Lfu => {
                let mut best: Option<(&String, u64)> = None;
                for key in &self.insertion {
                    let count = self.counts.get(key).copied().unwrap_or(0);
                    match best {
                        Some((_, lowest)) if count >= lowest => {}
                        _ => best = Some((key, count)),
                    }
                }
                best.map(|(key, _)| key)
            }
        }
    }

    /// Returns the access count recorded for a key.
    pub fn access_count(&self, key: &str) -> Option<u64> {
        self.counts.get(key).copied()
    }

    // == Length ==
    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Drops every key.
    pub fn clear(&mut self) {
        self.recency.clear();
        self.insertion.clear();
        self.counts.clear();
    }
}
