//! Requests
//!
//! Messages sent from the foreground proxy to the background relay. Each one
//! maps onto exactly one call on the network client, except the two control
//! kinds (`ping`, `disconnect`) which the relay handles itself.

use serde::{Deserialize, Serialize};

/// Requests from Proxy to Relay
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Request {
    /// Open the relay's connection to the network client
    Start(ConnectOptions),

    /// Subscribe to a channel
    Subscribe(ChannelRequest),

    /// Unsubscribe from a channel
    Unsubscribe(ChannelRequest),

    /// Ask the network to generate a channel key
    Keygen(KeygenRequest),

    /// Publish a message on a channel
    Publish(PublishRequest),

    /// Ask for information about the current connection
    Me,

    /// Ask for presence information on a channel
    Presence(PresenceRequest),

    // ============================================
    // Control
    // ============================================
    /// Liveness check; always answered with `pong`
    Ping,

    /// Close the relay's connection
    Disconnect,
}

impl Request {
    /// The wire tag of this request
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
            Self::Keygen(_) => "keygen",
            Self::Publish(_) => "publish",
            Self::Me => "me",
            Self::Presence(_) => "presence",
            Self::Ping => "ping",
            Self::Disconnect => "disconnect",
        }
    }

    /// Whether this is a control request handled by the relay itself
    #[must_use]
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Ping | Self::Disconnect)
    }
}

/// Where and as whom to connect
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Broker host name
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Whether to use a TLS connection
    pub secure: bool,
    /// Optional display name shown to other clients in presence events
    ///
    /// Early relays called this field `uid`; both spellings are accepted.
    #[serde(default, alias = "uid", skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl ConnectOptions {
    /// Create options without a username
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
            username: None,
        }
    }

    /// Set the username
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::new("127.0.0.1", 8080, false)
    }
}

/// Payload of `subscribe` and `unsubscribe`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRequest {
    /// Channel key
    pub key: String,
    /// Channel name
    pub channel: String,
}

/// Payload of a `keygen` request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeygenRequest {
    /// Master key used to authorise the generation
    pub key: String,
    /// Channel the new key is scoped to
    pub channel: String,
    /// Permission letters, e.g. `"rw"`
    pub permissions: String,
    /// Key lifetime in seconds (0 = no expiry)
    pub ttl: u64,
}

/// Payload of a `publish` request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Channel key
    pub key: String,
    /// Channel name
    pub channel: String,
    /// Message body
    pub message: String,
    /// Whether the publisher receives its own message (absent = broker default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<bool>,
    /// Retention in seconds (absent = not retained)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

/// Payload of a `presence` request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRequest {
    /// Channel key
    pub key: String,
    /// Channel name
    pub channel: String,
    /// Whether to receive an immediate status snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<bool>,
    /// Whether to receive subscribe/unsubscribe notifications from now on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_requests() {
        assert!(Request::Ping.is_control());
        assert!(Request::Disconnect.is_control());
        assert!(!Request::Me.is_control());
    }

    #[test]
    fn test_tags() {
        let start = Request::Start(ConnectOptions::default());
        assert_eq!(start.tag(), "start");
        assert_eq!(Request::Me.tag(), "me");
        assert_eq!(Request::Ping.tag(), "ping");
    }

    #[test]
    fn test_connect_options_builder() {
        let options = ConnectOptions::new("h", 1, true).with_username("u");
        assert_eq!(options.host, "h");
        assert_eq!(options.port, 1);
        assert!(options.secure);
        assert_eq!(options.username.as_deref(), Some("u"));
    }
}
