//! Background Module
//!
//! Durable mutation records replayed when connectivity returns, plus a
//! precache of critical static assets.

mod manager;

pub use manager::{BackgroundSync, ReplaySummary, SyncRecord, SyncSignal, ASSET_TAG, SYNC_PREFIX};

// == Background Config ==
/// Registration is off unless explicitly enabled.
#[derive(Debug, Clone, Default)]
pub struct BackgroundConfig {
    pub enabled: bool,
    /// Paths fetched and kept in the asset cache on initialize
    pub critical_assets: Vec<String>,
}
