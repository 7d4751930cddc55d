//! Network Client Capability
//!
//! The relay talks to the publish/subscribe network only through these two
//! traits. Whatever implements them owns the real connection, framing,
//! authentication and retries; the bridge treats it as a black box that
//! accepts a fixed set of calls and reports back through named callbacks.
//!
//! - [`NetworkClient`]: opens connections
//! - [`Connection`]: one open connection; callback registration plus outbound calls
//! - [`loopback`]: an in-memory implementation used by the CLI and tests

pub mod loopback;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use crate::protocol::ConnectOptions;
use crate::protocol::{KeygenPayload, MePayload, PresencePayload};

/// Callback invoked by a connection when one of its events fires
pub type ClientCallback = Box<dyn Fn(ClientEvent) + Send + Sync>;

/// Opens connections to the network
pub trait NetworkClient: Send + 'static {
    /// Connection type produced by [`NetworkClient::establish`]
    type Connection: Connection;

    /// Open a connection
    ///
    /// Success or failure is reported later through the connection's
    /// `connect` / `error` callbacks.
    fn establish(&mut self, options: &ConnectOptions) -> Self::Connection;
}

/// One open connection to the network
pub trait Connection: Send + 'static {
    /// Register a callback for one kind of event
    fn on(&mut self, kind: ClientEventKind, callback: ClientCallback);

    /// Subscribe to a channel
    fn subscribe(&mut self, args: ChannelArgs);

    /// Unsubscribe from a channel
    fn unsubscribe(&mut self, args: ChannelArgs);

    /// Request a channel key
    fn keygen(&mut self, args: KeygenArgs);

    /// Publish a message
    fn publish(&mut self, args: PublishArgs);

    /// Request information about this connection
    fn me(&mut self);

    /// Request presence information
    fn presence(&mut self, args: PresenceArgs);

    /// Close the connection
    fn disconnect(&mut self);
}

/// Kinds of events a connection reports
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClientEventKind {
    /// Connection established
    Connect,
    /// Connection closed
    Disconnect,
    /// Connection lost, client will retry on its own
    Offline,
    /// Something failed
    Error,
    /// A message arrived
    Message,
    /// A keygen request completed
    Keygen,
    /// Presence snapshot or change
    Presence,
    /// Connection information
    Me,
}

impl ClientEventKind {
    /// Every kind, in the order the relay registers them
    pub const ALL: [Self; 8] = [
        Self::Connect,
        Self::Disconnect,
        Self::Offline,
        Self::Error,
        Self::Message,
        Self::Keygen,
        Self::Presence,
        Self::Me,
    ];

    /// Event name as the network client knows it
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Offline => "offline",
            Self::Error => "error",
            Self::Message => "message",
            Self::Keygen => "keygen",
            Self::Presence => "presence",
            Self::Me => "me",
        }
    }
}

impl std::fmt::Display for ClientEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data carried by a connection event
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    /// Connection established
    Connect,
    /// Connection closed
    Disconnect,
    /// Connection lost
    Offline,
    /// Opaque error value
    Error(Value),
    /// Incoming message
    Message(ClientMessage),
    /// Keygen result
    Keygen(KeygenPayload),
    /// Presence data
    Presence(PresencePayload),
    /// Connection information
    Me(MePayload),
}

impl ClientEvent {
    /// The kind of this event
    #[must_use]
    pub fn kind(&self) -> ClientEventKind {
        match self {
            Self::Connect => ClientEventKind::Connect,
            Self::Disconnect => ClientEventKind::Disconnect,
            Self::Offline => ClientEventKind::Offline,
            Self::Error(_) => ClientEventKind::Error,
            Self::Message(_) => ClientEventKind::Message,
            Self::Keygen(_) => ClientEventKind::Keygen,
            Self::Presence(_) => ClientEventKind::Presence,
            Self::Me(_) => ClientEventKind::Me,
        }
    }
}

/// A message as delivered by the network client
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientMessage {
    /// Channel the message arrived on
    pub channel: String,
    /// Raw body
    pub body: Vec<u8>,
}

impl ClientMessage {
    /// Render the body as text, replacing invalid UTF-8
    #[must_use]
    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Arguments of `subscribe` / `unsubscribe`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelArgs {
    /// Channel key
    pub key: String,
    /// Channel name
    pub channel: String,
}

/// Arguments of `keygen`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeygenArgs {
    /// Master key
    pub key: String,
    /// Channel the new key is scoped to
    pub channel: String,
    /// Permission letters
    #[serde(rename = "type")]
    pub key_type: String,
    /// Key lifetime in seconds (0 = no expiry)
    pub ttl: u64,
}

/// Arguments of `publish`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishArgs {
    /// Channel key
    pub key: String,
    /// Channel name
    pub channel: String,
    /// Message body
    pub message: String,
    /// Whether the publisher receives its own message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<bool>,
    /// Retention in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

/// Arguments of `presence`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceArgs {
    /// Channel key
    pub key: String,
    /// Channel name
    pub channel: String,
    /// Whether to receive a status snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<bool>,
    /// Whether to receive change notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<bool>,
}
