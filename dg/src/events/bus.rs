//! NotificationBus - broadcast fan-out of notification events

use tokio::sync::broadcast;
use tracing::debug;

use super::types::NotificationEvent;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Pub/sub channel for notifications
///
/// Slow subscribers lag and lose the oldest events; they never block the emitter.
#[derive(Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<NotificationEvent>,
}

impl NotificationBus {
    /// Create a new bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "NotificationBus::new: called");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers
    ///
    /// This is fire-and-forget: if there are no subscribers, the event is dropped.
    pub fn emit(&self, event: NotificationEvent) {
        debug!(
            event_type = event.event_type(),
            file_path = ?event.file_path(),
            "NotificationBus::emit"
        );
        // No subscribers is OK
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}
