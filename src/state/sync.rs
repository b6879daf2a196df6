//! Cross-context state sync
//!
//! A pub/sub hub standing in for the same-origin storage broadcast that
//! keeps sibling contexts (tabs) in step. Delivery is last-write-wins.

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

/// Buffered messages per receiver before it starts lagging.
const SYNC_BUFFER_SIZE: usize = 64;

/// A full state snapshot published by one container.
#[derive(Debug, Clone)]
pub struct SyncMessage {
    /// Identifier of the publishing container
    pub origin: String,
    /// Serialized state
    pub state: Value,
}

/// Broadcast channel shared by every synced container.
#[derive(Debug, Clone)]
pub struct SyncHub {
    sender: broadcast::Sender<SyncMessage>,
}

impl SyncHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(SYNC_BUFFER_SIZE);
        Self { sender }
    }

    /// Publishes a snapshot to every subscriber, including the sender's own
    /// receiver (containers skip their own origin).
    pub fn publish(&self, message: SyncMessage) {
        // No receivers is fine: nobody else is listening
        let delivered = self.sender.send(message).unwrap_or(0);
        trace!(delivered, "Published state snapshot");
    }

    /// Opens a new receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncMessage> {
        self.sender.subscribe()
    }

    /// Number of joined receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SyncHub {
    fn default() -> Self {
        Self::new()
    }
}
