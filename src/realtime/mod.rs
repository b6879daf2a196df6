//! Real-time Module
//!
//! Push channel client: connection supervision with capped exponential
//! backoff, heartbeat liveness, typed message dispatch and the built-in
//! effects channel events have on application state.

mod client;
mod connector;
pub mod message;

use std::time::Duration;

pub use client::{ChannelStatus, ConnectionState, MessageHandler, RealtimeClient};
pub use connector::{channel_url, Connection, Connector, WebSocketConnector, CHANNEL_PATH};
pub use message::{ChannelEvent, InboundMessage, WireMessage};

/// False when the build disabled the channel with `PORTAL_DISABLE_REALTIME`.
pub const COMPILED_IN: bool = option_env!("PORTAL_DISABLE_REALTIME").is_none();

// == Realtime Config ==
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Runtime switch; combined with [`COMPILED_IN`]
    pub enabled: bool,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// Consecutive failed attempts before the client gives up
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    /// Delay between a successful login and the connect
    pub connect_delay: Duration,
}

impl RealtimeConfig {
    /// Delay before reconnect attempt `attempt` (1-based):
    /// `min(base * 2^(attempt - 1), max)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.reconnect_base_delay
            .saturating_mul(factor)
            .min(self.reconnect_max_delay)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        crate::Config::default().realtime()
    }
}
