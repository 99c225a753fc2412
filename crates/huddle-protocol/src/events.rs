//! Event types for the huddle protocol.
//!
//! Client events are parsed loosely (relay payloads stay as raw JSON objects)
//! because the hub forwards them without interpretation. Server events are
//! strongly typed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// An opaque user identifier, as supplied by the client at `init` time.
pub type UserId = String;

/// Event types the hub forwards without interpreting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayKind {
    /// A message was persisted; peers should re-fetch the thread.
    Message,
    /// A participant is typing.
    Typing,
    /// A message was deleted; peers should re-fetch the thread.
    Delete,
    /// Client-originated presence hint.
    Presence,
}

impl RelayKind {
    /// All relay kinds, in wire order.
    pub const ALL: [RelayKind; 4] = [
        RelayKind::Message,
        RelayKind::Typing,
        RelayKind::Delete,
        RelayKind::Presence,
    ];

    /// Map a `type` field to a relay kind.
    #[must_use]
    pub fn from_type(event_type: &str) -> Option<Self> {
        match event_type {
            "message" => Some(RelayKind::Message),
            "typing" => Some(RelayKind::Typing),
            "delete" => Some(RelayKind::Delete),
            "presence" => Some(RelayKind::Presence),
            _ => None,
        }
    }

    /// The wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayKind::Message => "message",
            RelayKind::Typing => "typing",
            RelayKind::Delete => "delete",
            RelayKind::Presence => "presence",
        }
    }
}

impl fmt::Display for RelayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event received from a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Identify the connection as belonging to `user_id`.
    Init {
        /// Non-empty user identifier.
        user_id: UserId,
    },

    /// An event to forward to every other connection.
    Relay {
        /// Which relay event this is.
        kind: RelayKind,
        /// The full JSON object as received, `type` field included.
        payload: Map<String, Value>,
    },
}

impl ClientEvent {
    /// The wire name of the event's `type` field.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::Init { .. } => "init",
            ClientEvent::Relay { kind, .. } => kind.as_str(),
        }
    }

    /// Create an `init` event.
    #[must_use]
    pub fn init(user_id: impl Into<UserId>) -> Self {
        ClientEvent::Init {
            user_id: user_id.into(),
        }
    }
}

/// An event originated by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// A user's aggregate online state changed.
    #[serde(rename = "presence", rename_all = "camelCase")]
    Presence {
        /// The user whose state changed.
        user_id: UserId,
        /// Whether the user now has at least one open connection.
        online: bool,
    },
}

impl ServerEvent {
    /// Create a presence event.
    #[must_use]
    pub fn presence(user_id: impl Into<UserId>, online: bool) -> Self {
        ServerEvent::Presence {
            user_id: user_id.into(),
            online,
        }
    }
}

/// A serialized event, shared between all recipients of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Encoded(Arc<str>);

impl Encoded {
    /// The JSON text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the encoded text is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Encoded {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&str> for Encoded {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for Encoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
