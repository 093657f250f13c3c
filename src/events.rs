//! Typed store event channel.
//!
//! Every committed mutation is announced here so callers can drive unread
//! badges, notifications or cache invalidation. Delivery is best-effort:
//! emitting without a live subscriber is logged and never an error.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Default capacity of the broadcast channel backing a [`EventChannel`].
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StoreEvent {
    FeedCreated { id: i64 },
    FeedUpdated { id: i64 },
    FeedDeleted { id: i64, reason: String },
    EntryAdded { id: i64 },
    EntryMarkedRead { id: i64 },
    EntryArchived { id: i64 },
    EntryDeleted { id: i64, reason: String },
}

#[derive(Debug, Clone)]
pub struct EventChannel {
    sender: broadcast::Sender<StoreEvent>,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    /// Best-effort emit. A send only fails when nobody is listening, which
    /// is a normal state for an embedded store.
    pub fn emit(&self, event: StoreEvent) {
        if let Err(error) = self.sender.send(event) {
            debug!(event = ?error.0, "store event dropped: no live subscriber");
        }
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_kebab_case_type_tag() {
        let event = StoreEvent::FeedDeleted {
            id: 7,
            reason: "unsubscribe".to_string(),
        };
        let json = serde_json::to_value(&event).expect("event must serialize");
        assert_eq!(json["type"], "feed-deleted");
        assert_eq!(json["id"], 7);
        assert_eq!(json["reason"], "unsubscribe");
    }

    #[tokio::test]
    async fn emit_without_subscriber_is_not_fatal() {
        let channel = EventChannel::default();
        channel.emit(StoreEvent::EntryAdded { id: 1 });

        let mut receiver = channel.subscribe();
        channel.emit(StoreEvent::EntryAdded { id: 2 });
        assert_eq!(
            receiver.recv().await.expect("event must arrive"),
            StoreEvent::EntryAdded { id: 2 }
        );
    }
}
