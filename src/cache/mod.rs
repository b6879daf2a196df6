//! Cache Module
//!
//! Provides in-memory caching with TTL expiration, tag invalidation and
//! LRU / LFU / FIFO eviction.

mod entry;
mod shared;
mod stats;
mod store;
mod tracker;


// Re-export public types
pub use entry::CacheEntry;
pub use shared::{FetchOptions, SharedCache};
pub use stats::CacheStats;
pub use store::{CacheConfig, CacheStore, SetOptions};
pub use tracker::{AccessTracker, EvictionPolicy};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;
