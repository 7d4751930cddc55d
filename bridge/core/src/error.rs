//! Bridge Errors
//!
//! Failures the bridge itself can report. Protocol-level failures (unknown
//! tags, malformed frames) are never errors: they are logged and dropped.
//! Network-client failures travel as `error` responses, not as this type.

use thiserror::Error;

/// Errors raised by the proxy, the relay launcher, or the channel
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A relay context could only be spawned from inside a tokio runtime
    #[error("No tokio runtime available to host the relay context")]
    NoRuntime,

    /// The peer end of the channel is gone
    #[error("Channel closed")]
    ChannelClosed,

    /// The relay was declared dead and `connect` has not been called since
    #[error("Relay unavailable: call connect to relaunch it")]
    RelayUnavailable,

    /// A message could not be turned into a frame
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    /// The launcher refused to start a relay context
    #[error("Failed to launch relay: {0}")]
    Launch(String),
}
