//! Bridge Core - Typed Relay Between a Foreground Proxy and a Background Worker
//!
//! This crate keeps a long-lived publish/subscribe connection inside an
//! isolated relay context and gives application code a typed method and
//! listener API over it. The network client itself is a black box behind the
//! [`client::NetworkClient`] trait.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐        ┌──────────────────────────────────────┐
//! │          FOREGROUND PROXY            │        │          BACKGROUND RELAY            │
//! │                                      │        │                                      │
//! │  connect subscribe publish ...  ─────┼─ Request ──▶ dispatch table                  │
//! │                                      │        │        │                             │
//! │  on/off ─▶ Listeners ◀── dispatch ◀──┼── Response ◀─ repackage ◀── callbacks        │
//! │                                      │        │        │                ▲            │
//! │  Heartbeat ── ping every interval ───┼──────▶ │ pong   ▼                │            │
//! │            ◀──────────────────────── ┼ ────── │   ┌─────────────────────┴─────────┐  │
//! │  too many unanswered: terminate      │        │   │   NetworkClient / Connection  │  │
//! │  relay, synthesize `disconnect`      │        │   └───────────────────────────────┘  │
//! └──────────────────────────────────────┘        └──────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`RelayProxy`]: application-facing handle; methods, listeners, heartbeat
//! - [`Relay`]: owns the single network connection inside the relay context
//! - [`Request`] / [`Response`]: the tagged wire vocabulary
//! - [`RelayLauncher`]: locates and starts relay contexts
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use bridge_core::{
//!     client::loopback::{LoopbackBroker, LoopbackClient},
//!     event, ConnectOptions, HeartbeatConfig, MessagePayload, RelayProxy, TaskLauncher,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), bridge_core::BridgeError> {
//!     let broker = LoopbackBroker::new("master-key");
//!     let launcher = TaskLauncher::new(move || LoopbackClient::new(broker.clone()));
//!     let proxy = RelayProxy::new(launcher, HeartbeatConfig::default())?;
//!
//!     proxy.on(event::Connect, Arc::new(|| println!("connected")));
//!     proxy.on(event::Message, Arc::new(|m: &MessagePayload| println!("{}", m.message)));
//!
//!     proxy.connect(ConnectOptions::new("127.0.0.1", 8080, false))?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`protocol`]: request/response enums and frame encoding
//! - [`transport`]: the in-process channel and relay launchers
//! - [`proxy`]: the foreground proxy, listener registry and heartbeat
//! - [`relay`]: the background relay
//! - [`client`]: the network-client capability and an in-memory loopback
//! - [`config`]: TOML / environment configuration
//! - [`error`]: bridge errors

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod proxy;
pub mod relay;
pub mod transport;

// Re-exports for convenience
pub use error::BridgeError;
pub use protocol::{
    ChannelRequest, ConnectOptions, ErrorPayload, KeygenPayload, KeygenRequest, MePayload,
    MessagePayload, PresenceMember, PresencePayload, PresenceRequest, PublishRequest, Request,
    Response,
};
pub use proxy::{
    event, ControlListener, EventKind, HeartbeatConfig, Liveness, PayloadListener, RelayProxy,
};
pub use relay::Relay;
pub use transport::{RelayContext, RelayLauncher, TaskLauncher};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, BridgeConfig, BridgeToml, ConfigError,
    ConfigOverrides, ConfigSource,
};
