//! Broadcast event bus for distributing `AutomationEvent` to subscribers.
//!
//! Built on `tokio::sync::broadcast`. Publishing with no active subscribers
//! is a no-op, so components can emit freely whether or not anything
//! listens.

use conductor_types::event::AutomationEvent;
use tokio::sync::broadcast;

/// Multi-consumer bus for workflow, alert and scheduler events.
///
/// Cloning the bus clones the sender.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AutomationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive all events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AutomationEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: AutomationEvent) {
        tracing::trace!(event_type = event.type_name(), "publishing event");
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}
