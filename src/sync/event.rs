//! Channel fan-out for the preview sync server.

use tokio::sync::broadcast;

/// Source id used for envelopes the daemon itself originates.
pub const DAEMON_SOURCE: u64 = 0;

/// Broadcasts serialized envelopes to every connected sync peer.
///
/// Each message is tagged with the source connection id so a peer never
/// receives its own envelope echoed back.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<(u64, String)>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Send a serialized envelope to all connected peers.
    pub fn broadcast(&self, source: u64, json: String) {
        // Ignore errors — no subscribers is fine
        let _ = self.tx.send((source, json));
    }

    /// Subscribe to all broadcast envelopes.
    pub fn subscribe(&self) -> broadcast::Receiver<(u64, String)> {
        self.tx.subscribe()
    }
}
