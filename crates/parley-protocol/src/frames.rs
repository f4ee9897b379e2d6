//! Frame types for the parley protocol.
//!
//! Frames are the fundamental unit of communication between chat clients
//! and the relay. Each frame is serialized using MessagePack.

use serde::{Deserialize, Serialize};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Join = 0x01,
    Leave = 0x02,
    Send = 0x03,
    PrivateSend = 0x04,
    Event = 0x05,
    PresenceUpdate = 0x06,
    Ack = 0x07,
    Error = 0x08,
    Ping = 0x09,
    Pong = 0x0A,
    Connect = 0x0B,
    Connected = 0x0C,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Join),
            0x02 => Ok(FrameType::Leave),
            0x03 => Ok(FrameType::Send),
            0x04 => Ok(FrameType::PrivateSend),
            0x05 => Ok(FrameType::Event),
            0x06 => Ok(FrameType::PresenceUpdate),
            0x07 => Ok(FrameType::Ack),
            0x08 => Ok(FrameType::Error),
            0x09 => Ok(FrameType::Ping),
            0x0A => Ok(FrameType::Pong),
            0x0B => Ok(FrameType::Connect),
            0x0C => Ok(FrameType::Connected),
            _ => Err("Invalid frame type"),
        }
    }
}

/// Classification of a chat event.
///
/// The string forms (`BROADCAST`, `PRIVATE`, `JOIN`, `LEAVE`) are shared
/// between the wire protocol, the message store, and the history API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Delivered to every subscriber of the public topic.
    Broadcast,
    /// Delivered to a single named recipient.
    Private,
    /// A user joined the chat.
    Join,
    /// A user left the chat.
    Leave,
}

impl EventKind {
    /// Storage string form of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Broadcast => "BROADCAST",
            EventKind::Private => "PRIVATE",
            EventKind::Join => "JOIN",
            EventKind::Leave => "LEAVE",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BROADCAST" => Ok(EventKind::Broadcast),
            "PRIVATE" => Ok(EventKind::Private),
            "JOIN" => Ok(EventKind::Join),
            "LEAVE" => Ok(EventKind::Leave),
            _ => Err("Invalid event kind"),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol frame.
///
/// Client-to-server frames carry the inbound chat routes; server-to-client
/// frames carry deliveries and acknowledgments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Announce a user joining the chat.
    #[serde(rename = "join")]
    Join {
        /// Request ID for acknowledgment.
        id: u64,
        /// The joining user.
        username: String,
    },

    /// Announce a user leaving the chat.
    #[serde(rename = "leave")]
    Leave {
        /// Request ID for acknowledgment.
        id: u64,
        /// The departing user.
        username: String,
    },

    /// Send a message to the public topic.
    #[serde(rename = "send")]
    Send {
        /// Optional request ID for acknowledgment.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        /// Sending user.
        sender: String,
        /// Message body.
        content: String,
    },

    /// Send a message to a single recipient.
    #[serde(rename = "private_send")]
    PrivateSend {
        /// Optional request ID for acknowledgment.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        /// Sending user.
        sender: String,
        /// Target user.
        recipient: String,
        /// Message body.
        content: String,
    },

    /// A chat event delivered by the server.
    #[serde(rename = "event")]
    Event {
        /// Event classification.
        kind: EventKind,
        /// Originating user.
        sender: String,
        /// Message body, absent for join/leave markers without text.
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        /// Target user for private events.
        #[serde(skip_serializing_if = "Option::is_none")]
        recipient: Option<String>,
        /// Server-assigned timestamp (milliseconds since the Unix epoch).
        timestamp: u64,
    },

    /// Full active-user set, emitted on every presence change.
    #[serde(rename = "presence_update")]
    PresenceUpdate {
        /// Every currently connected user.
        users: Vec<String>,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Initial connection handshake.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol version.
        version: u8,
        /// Optional authentication token.
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Connection established response.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Negotiated protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Join { .. } => FrameType::Join,
            Frame::Leave { .. } => FrameType::Leave,
            Frame::Send { .. } => FrameType::Send,
            Frame::PrivateSend { .. } => FrameType::PrivateSend,
            Frame::Event { .. } => FrameType::Event,
            Frame::PresenceUpdate { .. } => FrameType::PresenceUpdate,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
        }
    }

    /// Create a new Join frame.
    #[must_use]
    pub fn join(id: u64, username: impl Into<String>) -> Self {
        Frame::Join {
            id,
            username: username.into(),
        }
    }

    /// Create a new Leave frame.
    #[must_use]
    pub fn leave(id: u64, username: impl Into<String>) -> Self {
        Frame::Leave {
            id,
            username: username.into(),
        }
    }

    /// Create a new Send frame.
    #[must_use]
    pub fn send(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Frame::Send {
            id: None,
            sender: sender.into(),
            content: content.into(),
        }
    }

    /// Create a new PrivateSend frame.
    #[must_use]
    pub fn private_send(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Frame::PrivateSend {
            id: None,
            sender: sender.into(),
            recipient: recipient.into(),
            content: content.into(),
        }
    }

    /// Create a new PresenceUpdate frame.
    #[must_use]
    pub fn presence_update(users: Vec<String>) -> Self {
        Frame::PresenceUpdate { users }
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(version: u8, token: Option<String>) -> Self {
        Frame::Connect { version, token }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_frame_type() {
        let join = Frame::join(1, "alice");
        assert_eq!(join.frame_type(), FrameType::Join);

        let send = Frame::send("alice", "hello");
        assert_eq!(send.frame_type(), FrameType::Send);

        let private = Frame::private_send("alice", "bob", "psst");
        assert_eq!(private.frame_type(), FrameType::PrivateSend);
    }

    #[test]
    fn test_event_kind_strings() {
        assert_eq!(EventKind::Broadcast.as_str(), "BROADCAST");
        assert_eq!(EventKind::from_str("PRIVATE"), Ok(EventKind::Private));
        assert_eq!(EventKind::from_str("JOIN"), Ok(EventKind::Join));
        assert_eq!(EventKind::from_str("LEAVE"), Ok(EventKind::Leave));
        assert!(EventKind::from_str("broadcast").is_err());
    }

    #[test]
    fn test_frame_type_conversion() {
        assert_eq!(FrameType::try_from(0x03), Ok(FrameType::Send));
        assert_eq!(FrameType::try_from(0x06), Ok(FrameType::PresenceUpdate));
        assert!(FrameType::try_from(0xFF).is_err());
    }
}
