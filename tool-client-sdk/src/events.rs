//! Typed lifecycle events
//!
//! A broadcast bus replaces ad-hoc event-emitter callbacks: every state
//! transition in the pool and manager publishes one typed event, and any
//! number of observers can subscribe. Delivery is best-effort per
//! subscriber (a lagging receiver drops the oldest events, never blocks
//! the publisher).

use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted by the pool and client manager
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The client manager completed initialization
    Initialized,
    /// The client manager shut down
    Shutdown,
    /// A server definition was registered
    ServerRegistered { server_id: String },
    /// A server definition was removed
    ServerUnregistered { server_id: String },
    /// A new pooled connection went live
    ConnectionCreated { server_id: String, connection_id: Uuid },
    /// A pooled connection was closed (idle sweep, eviction, shutdown)
    ConnectionClosed { server_id: String, connection_id: Uuid },
    /// A pooled connection failed with a transport error
    ConnectionError {
        server_id: String,
        connection_id: Uuid,
        message: String,
    },
}

/// Broadcast bus for [`ClientEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with a bounded per-subscriber backlog
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; silently a no-op with zero subscribers
    pub fn emit(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(ClientEvent::Initialized);
        bus.emit(ClientEvent::Shutdown);
        assert!(matches!(rx.recv().await.unwrap(), ClientEvent::Initialized));
        assert!(matches!(rx.recv().await.unwrap(), ClientEvent::Shutdown));
    }

    #[test]
    fn emit_without_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        bus.emit(ClientEvent::Initialized);
    }
}
