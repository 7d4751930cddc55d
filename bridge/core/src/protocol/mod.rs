//! Wire Protocol
//!
//! The closed vocabulary spoken across the channel between the foreground
//! proxy and the background relay. Every frame is a JSON object with a `type`
//! tag and, for kinds that carry data, a `payload` object:
//!
//! ```text
//!   Proxy ──── Request  ────▶ Relay
//!         start subscribe unsubscribe keygen publish me presence ping disconnect
//!
//!   Proxy ◀─── Response ───── Relay
//!         connect disconnect offline error message keygen presence me pong
//! ```
//!
//! The two families share the tag namespace (`keygen`, `me`, `presence` and
//! `disconnect` appear on both sides), so each direction has its own enum and
//! the direction decides which one a frame is decoded into.
//!
//! Frames with an unknown tag are ignored by both sides. See [`wire`].

pub mod request;
pub mod response;
pub mod wire;

pub use request::{
    ChannelRequest, ConnectOptions, KeygenRequest, PresenceRequest, PublishRequest, Request,
};
pub use response::{
    ErrorPayload, KeygenPayload, MePayload, MessagePayload, PresenceMember, PresencePayload,
    Response,
};
pub use wire::{decode_request, decode_response, encode, tag_of};
