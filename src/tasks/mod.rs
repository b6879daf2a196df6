//! Background Tasks Module
//!
//! Contains background tasks that run periodically while the sync layer is up.
//!
//! # Tasks
//! - TTL Sweep: Removes expired cache entries at configured intervals
//! - Health Monitor: Logs degraded cache, channel and connectivity conditions

mod cleanup;
mod health;

pub use cleanup::spawn_cleanup_task;
pub use health::{spawn_health_monitor, HealthProbe, HealthReport, LOW_HIT_RATIO, MIN_LOOKUPS};
