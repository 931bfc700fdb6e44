//! Daemon event bus.
//!
//! Events are broadcast to in-process subscribers, such as an external
//! push-notification dispatcher. Each subscriber has an independent buffer;
//! slow subscribers lag and lose the oldest events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use herald_delivery::PushNotifier;
use herald_types::Message;

/// An event emitted by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type name (e.g. "PushNotificationRequested", "DaemonStarted").
    pub event_type: String,
    /// Unix timestamp.
    pub timestamp: u64,
    /// Type-specific payload.
    pub payload: serde_json::Value,
}

impl Event {
    pub fn now(event_type: &str, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp: herald_delivery::now_ms() / 1000,
            payload,
        }
    }
}

/// Event bus for broadcasting events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: Event) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Number of events emitted so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

/// [`PushNotifier`] that publishes `PushNotificationRequested` events.
///
/// The payload names the recipient and the message but carries no content.
#[derive(Clone)]
pub struct EventNotifier {
    bus: EventBus,
}

impl EventNotifier {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl PushNotifier for EventNotifier {
    async fn notify(&self, message: &Message) {
        self.bus.emit(Event::now(
            "PushNotificationRequested",
            serde_json::json!({
                "recipient_id": message.recipient_id,
                "conversation_id": message.conversation_id,
                "sender_id": message.sender_id,
                "message_id": message.message_id,
                "sequence": message.sequence,
            }),
        ));
    }
}
