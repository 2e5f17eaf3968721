use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::events::EventFrame;

pub type EventSender = mpsc::UnboundedSender<EventFrame>;

/// Tracks the outbound event queue of every live connection.
///
/// Emission never blocks: each connection has an unbounded queue drained by
/// its own pump task, so a slow consumer cannot stall a room. Room-scoped
/// fan-out pushes to every member in one pass while the room lock is held,
/// which is what gives every subscriber the same total order.
pub struct ConnectionBus {
    connections: DashMap<String, EventSender>,
}

impl ConnectionBus {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn add(&self, connection_id: String, sender: EventSender) {
        self.connections.insert(connection_id, sender);
    }

    pub fn remove(&self, connection_id: &str) {
        if self.connections.remove(connection_id).is_some() {
            debug!(connection_id, "connection unregistered from bus");
        }
    }

    pub fn send_to(&self, connection_id: &str, frame: EventFrame) {
        if let Some(sender) = self.connections.get(connection_id) {
            // A closed receiver just means the socket is going away.
            let _ = sender.send(frame);
        }
    }

    pub fn send_many<'a, I>(&self, connection_ids: I, frame: EventFrame)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for connection_id in connection_ids {
            self.send_to(connection_id, frame.clone());
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ConnectionBus {
    fn default() -> Self {
        Self::new()
    }
}
