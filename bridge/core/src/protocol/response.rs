//! Responses
//!
//! Messages sent from the background relay back to the foreground proxy.
//! All of them except `pong` are repackaged network-client events and are
//! delivered to the listener registered for the matching kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Responses from Relay to Proxy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Response {
    /// The network client connected
    Connect,

    /// The network client disconnected
    Disconnect,

    /// The network client went offline
    Offline,

    /// The network client reported an error
    Error(ErrorPayload),

    /// A message arrived on a subscribed channel
    Message(MessagePayload),

    /// Result of a `keygen` request
    Keygen(KeygenPayload),

    /// Presence snapshot or change notification
    Presence(PresencePayload),

    /// Information about the current connection
    Me(MePayload),

    /// Answer to `ping`; never delivered to listeners
    Pong,
}

impl Response {
    /// The wire tag of this response
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Offline => "offline",
            Self::Error(_) => "error",
            Self::Message(_) => "message",
            Self::Keygen(_) => "keygen",
            Self::Presence(_) => "presence",
            Self::Me(_) => "me",
            Self::Pong => "pong",
        }
    }
}

/// Payload of an `error` response
///
/// The error value is whatever the network client produced; the bridge does
/// not interpret it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Opaque error value
    pub error: Value,
}

/// Payload of a `message` response
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Channel the message arrived on
    pub channel: String,
    /// Message body rendered as text
    pub message: String,
}

/// Payload of a `keygen` response
///
/// Success and failure share the `keygen` tag; the shape tells them apart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeygenPayload {
    /// A key was generated
    Granted {
        /// Status code reported by the broker
        status: u16,
        /// The generated key
        key: String,
        /// Channel the key is scoped to
        channel: String,
    },
    /// Key generation was refused
    Denied {
        /// Status code reported by the broker
        status: u16,
        /// Human-readable reason; a payload without one is neither shape
        message: String,
    },
}

impl KeygenPayload {
    /// Status code of either variant
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Granted { status, .. } | Self::Denied { status, .. } => *status,
        }
    }

    /// Whether a key was generated
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

/// A client seen in a presence event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMember {
    /// Connection id
    pub id: String,
    /// Username supplied at connect time, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Payload of a `presence` response, discriminated by its `event` field
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum PresencePayload {
    /// Snapshot of everyone currently subscribed
    Status {
        /// Channel the snapshot describes
        channel: String,
        /// Unix timestamp (seconds)
        time: u64,
        /// Current subscribers
        who: Vec<PresenceMember>,
    },
    /// Someone subscribed
    Subscribe {
        /// Channel that gained a subscriber
        channel: String,
        /// Unix timestamp (seconds)
        time: u64,
        /// The new subscriber
        who: PresenceMember,
    },
    /// Someone unsubscribed
    Unsubscribe {
        /// Channel that lost a subscriber
        channel: String,
        /// Unix timestamp (seconds)
        time: u64,
        /// The departed subscriber
        who: PresenceMember,
    },
}

impl PresencePayload {
    /// Channel of any variant
    #[must_use]
    pub fn channel(&self) -> &str {
        match self {
            Self::Status { channel, .. }
            | Self::Subscribe { channel, .. }
            | Self::Unsubscribe { channel, .. } => channel,
        }
    }
}

/// Payload of a `me` response
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MePayload {
    /// Connection id assigned by the broker
    pub id: String,
}
