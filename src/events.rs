//! Event bus for bridge progress
//!
//! The orchestrator publishes every `BridgeUpdate` here; consumers subscribe
//! and receive updates in publication order.

use tokio::sync::broadcast;
use tracing::trace;

use common::bridge_types::BridgeUpdate;

/// Default number of buffered updates per subscriber
pub const DEFAULT_CAPACITY: usize = 64;

/// Broadcast channel of bridge updates
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BridgeUpdate>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an update. Returns how many subscribers received it.
    pub fn publish(&self, update: BridgeUpdate) -> usize {
        trace!("[{}] {}: {}", update.operation_id, update.phase, update.message);
        // không có subscriber thì bỏ qua
        self.sender.send(update).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeUpdate> {
        self.sender.subscribe()
    }
}
