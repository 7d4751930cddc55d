//! In-Process Channel
//!
//! The duplex link between the proxy and the relay contexts: two unbounded
//! tokio queues carrying JSON frames. Sending never blocks, frames from one
//! sender arrive in the order they were sent, and every frame is an owned
//! value, so neither side can observe the other's state.
//!
//! # Usage
//!
//! ```ignore
//! let (proxy_end, relay_end) = new_pair();
//!
//! // Hand relay_end to the relay context
//! tokio::spawn(relay.run(relay_end.receiver));
//!
//! // Use proxy_end in the proxy
//! proxy_end.sender.send(&Request::Ping)?;
//! ```

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::BridgeError;
use crate::protocol::wire;

/// Sending half of one channel direction
#[derive(Clone, Debug)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<Value>,
}

impl FrameSender {
    /// Encode a message and queue it for the peer
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Encode`] if the message cannot be encoded and
    /// [`BridgeError::ChannelClosed`] if the peer is gone.
    pub fn send<T: Serialize>(&self, message: &T) -> Result<(), BridgeError> {
        let frame = wire::encode(message)?;
        self.send_frame(frame)
    }

    /// Queue an already-encoded frame for the peer
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ChannelClosed`] if the peer is gone.
    pub fn send_frame(&self, frame: Value) -> Result<(), BridgeError> {
        tracing::trace!(tag = ?wire::tag_of(&frame), "Frame sent");
        self.tx.send(frame).map_err(|_| BridgeError::ChannelClosed)
    }

    /// Whether the receiving half has been dropped
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of one channel direction
#[derive(Debug)]
pub struct FrameReceiver {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl FrameReceiver {
    /// Wait for the next frame; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// Take the next frame if one is already queued
    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }
}

/// The proxy's end of the channel: sends requests, receives responses
#[derive(Debug)]
pub struct ProxyEndpoint {
    /// Requests towards the relay
    pub sender: FrameSender,
    /// Responses from the relay
    pub receiver: FrameReceiver,
}

/// The relay's end of the channel: receives requests, sends responses
#[derive(Debug)]
pub struct RelayEndpoint {
    /// Responses towards the proxy
    pub sender: FrameSender,
    /// Requests from the proxy
    pub receiver: FrameReceiver,
}

/// Create a connected channel pair
#[must_use]
pub fn new_pair() -> (ProxyEndpoint, RelayEndpoint) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();

    let proxy = ProxyEndpoint {
        sender: FrameSender { tx: request_tx },
        receiver: FrameReceiver { rx: response_rx },
    };
    let relay = RelayEndpoint {
        sender: FrameSender { tx: response_tx },
        receiver: FrameReceiver { rx: request_rx },
    };

    (proxy, relay)
}
