//! Chat event types.
//!
//! A [`ChatEvent`] is constructed when an inbound message is accepted and
//! is immutable from then on; the server assigns the timestamp at
//! processing time.

use parley_protocol::EventKind;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// A classified chat event flowing through the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Event classification.
    pub kind: EventKind,
    /// Originating user. Always non-empty for accepted events.
    pub sender: String,
    /// Message body; join/leave markers may have none.
    pub content: Option<String>,
    /// Target user; present only for private events.
    pub recipient: Option<String>,
    /// Server-assigned timestamp (milliseconds since the Unix epoch).
    pub timestamp: u64,
}

impl ChatEvent {
    /// Create a public broadcast event, stamped with the current time.
    #[must_use]
    pub fn broadcast(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Broadcast,
            sender: sender.into(),
            content: Some(content.into()),
            recipient: None,
            timestamp: now_millis(),
        }
    }

    /// Create a private event addressed to a single recipient.
    #[must_use]
    pub fn private(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            kind: EventKind::Private,
            sender: sender.into(),
            content: Some(content.into()),
            recipient: Some(recipient.into()),
            timestamp: now_millis(),
        }
    }

    /// Create a join announcement for the public topic.
    #[must_use]
    pub fn join(username: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Join,
            sender: username.into(),
            content: None,
            recipient: None,
            timestamp: now_millis(),
        }
    }

    /// Create a leave announcement with a server-constructed notice.
    #[must_use]
    pub fn leave(username: impl Into<String>, notice: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Leave,
            sender: username.into(),
            content: Some(notice.into()),
            recipient: None,
            timestamp: now_millis(),
        }
    }

    /// Whether this event targets a single recipient.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.kind == EventKind::Private
    }
}

/// A durable record derived from an accepted [`ChatEvent`].
///
/// The identity is assigned by the message store and is unique and
/// monotonically increasing. Records are never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedMessage {
    /// Store-assigned identity.
    pub id: i64,
    /// Event classification.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Originating user.
    pub sender: String,
    /// Message body.
    pub content: Option<String>,
    /// Target user for private messages.
    pub recipient: Option<String>,
    /// Server-assigned timestamp (milliseconds since the Unix epoch).
    pub timestamp: u64,
}

impl PersistedMessage {
    /// Build a record from an event and a store-assigned identity.
    #[must_use]
    pub fn from_event(id: i64, event: &ChatEvent) -> Self {
        Self {
            id,
            kind: event.kind,
            sender: event.sender.clone(),
            content: event.content.clone(),
            recipient: event.recipient.clone(),
            timestamp: event.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_constructors() {
        let before = now_millis();
        let event = ChatEvent::broadcast("alice", "hello");

        assert_eq!(event.kind, EventKind::Broadcast);
        assert_eq!(event.sender, "alice");
        assert_eq!(event.content.as_deref(), Some("hello"));
        assert!(event.recipient.is_none());
        assert!(event.timestamp >= before);

        let private = ChatEvent::private("alice", "bob", "psst");
        assert!(private.is_private());
        assert_eq!(private.recipient.as_deref(), Some("bob"));

        let join = ChatEvent::join("alice");
        assert_eq!(join.kind, EventKind::Join);
        assert!(join.content.is_none());
    }

    #[test]
    fn test_persisted_message_from_event() {
        let event = ChatEvent::private("alice", "bob", "psst");
        let record = PersistedMessage::from_event(7, &event);

        assert_eq!(record.id, 7);
        assert_eq!(record.kind, EventKind::Private);
        assert_eq!(record.sender, "alice");
        assert_eq!(record.timestamp, event.timestamp);
    }

    #[test]
    fn test_persisted_message_json_uses_type_field() {
        let record = PersistedMessage::from_event(1, &ChatEvent::broadcast("alice", "hi"));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["type"], "BROADCAST");
        assert_eq!(json["sender"], "alice");
    }
}
