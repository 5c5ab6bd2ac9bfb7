//! Observable mesh lifecycle events.
//!
//! The manager publishes membership and delegation transitions on a
//! broadcast channel so outer layers (event log, metrics, UIs) can follow
//! along without being wired into the core.

use tokio::sync::broadcast;

/// A membership or delegation transition.
#[derive(Debug, Clone)]
pub enum MeshEvent {
    PeerDiscovered { node_id: String },
    PeerJoined { node_id: String },
    PeerLeft { node_id: String },
    PeerSuspected { node_id: String },
    PeerUnreachable { node_id: String },
    PeerEvicted { node_id: String },
    TaskDelegated { task_id: String, peer_node_id: String },
    TaskResolved { task_id: String },
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Fan-out publisher for [`MeshEvent`]s. Slow subscribers lag and drop
/// rather than backpressure the mesh loops.
#[derive(Debug, Clone)]
pub struct MeshEvents {
    tx: broadcast::Sender<MeshEvent>,
}

impl MeshEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. A send with no subscribers is not an error.
    pub fn emit(&self, event: MeshEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for MeshEvents {
    fn default() -> Self {
        Self::new()
    }
}
