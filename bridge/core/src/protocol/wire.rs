//! Frame encoding and decoding
//!
//! Frames are `serde_json::Value` objects. Decoding is lenient by policy: a
//! frame whose tag is not part of the vocabulary, or whose payload does not
//! match its tag, is logged at `debug` and dropped. Neither side ever fails
//! because the other side speaks a newer or older protocol revision.
//!
//! Peers that always attach a payload send `"payload": {}` (or `null`) with
//! kinds that carry none. Such frames decode as the bare kind.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::request::Request;
use super::response::Response;
use crate::error::BridgeError;

/// Turn a request or response into a frame
///
/// # Errors
///
/// Returns [`BridgeError::Encode`] if the message cannot be represented as JSON.
pub fn encode<T: Serialize>(message: &T) -> Result<Value, BridgeError> {
    Ok(serde_json::to_value(message)?)
}

/// The `type` tag of a frame, if it has one
#[must_use]
pub fn tag_of(frame: &Value) -> Option<&str> {
    frame.get("type").and_then(Value::as_str)
}

/// Decode a frame received by the relay
#[must_use]
pub fn decode_request(frame: Value) -> Option<Request> {
    decode(frame, "Ignoring unrecognised request frame")
}

/// Decode a frame received by the proxy
#[must_use]
pub fn decode_response(frame: Value) -> Option<Response> {
    decode(frame, "Ignoring unrecognised response frame")
}

fn decode<T: DeserializeOwned>(frame: Value, context: &'static str) -> Option<T> {
    let tag = tag_of(&frame).map(str::to_owned);
    let error = match serde_json::from_value(frame.clone()) {
        Ok(message) => return Some(message),
        Err(e) => e,
    };
    if let Some(bare) = without_empty_payload(frame) {
        if let Ok(message) = serde_json::from_value(bare) {
            return Some(message);
        }
    }
    tracing::debug!(tag = ?tag, error = %error, "{context}");
    None
}

/// The frame minus its payload, when that payload is `{}` or `null`
fn without_empty_payload(mut frame: Value) -> Option<Value> {
    let object = frame.as_object_mut()?;
    let empty = match object.get("payload")? {
        Value::Null => true,
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    };
    if !empty {
        return None;
    }
    object.remove("payload");
    Some(frame)
}
