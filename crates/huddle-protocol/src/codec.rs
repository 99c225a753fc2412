//! JSON codec for huddle events.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::events::{ClientEvent, Encoded, RelayKind, ServerEvent};

/// Maximum inbound event size (64 KiB).
pub const MAX_EVENT_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event exceeds the size limit.
    #[error("Event size {0} exceeds maximum {1}")]
    EventTooLarge(usize, usize),

    /// Invalid UTF-8 or JSON.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is valid JSON but not an object.
    #[error("Event is not a JSON object")]
    NotAnObject,

    /// A required field is missing or has the wrong type.
    #[error("Missing or invalid field: {0}")]
    MissingField(&'static str),

    /// The `type` field names an event the hub does not handle.
    #[error("Unknown event type: {0}")]
    UnknownType(String),
}

/// Decode a client event using the default size limit.
///
/// # Errors
///
/// Returns an error if the payload is too large, not a JSON object, or does
/// not describe a known event.
pub fn decode(data: &[u8]) -> Result<ClientEvent, ProtocolError> {
    decode_with_limit(data, MAX_EVENT_SIZE)
}

/// Decode a client event, rejecting payloads larger than `max_size` bytes.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_with_limit(data: &[u8], max_size: usize) -> Result<ClientEvent, ProtocolError> {
    if data.len() > max_size {
        return Err(ProtocolError::EventTooLarge(data.len(), max_size));
    }

    let Value::Object(payload) = serde_json::from_slice::<Value>(data)? else {
        return Err(ProtocolError::NotAnObject);
    };

    let event_type = match payload.get("type") {
        Some(Value::String(t)) => t.clone(),
        _ => return Err(ProtocolError::MissingField("type")),
    };

    if event_type == "init" {
        return match payload.get("userId") {
            Some(Value::String(id)) if !id.is_empty() => Ok(ClientEvent::Init {
                user_id: id.clone(),
            }),
            _ => Err(ProtocolError::MissingField("userId")),
        };
    }

    match RelayKind::from_type(&event_type) {
        Some(kind) => Ok(ClientEvent::Relay { kind, payload }),
        None => Err(ProtocolError::UnknownType(event_type)),
    }
}

/// Encode a server event.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(event: &ServerEvent) -> Result<Encoded, ProtocolError> {
    Ok(serde_json::to_string(event)?.into())
}

/// Re-serialize a relay payload for fan-out. Keys keep the order they
/// arrived in.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_relay(payload: &Map<String, Value>) -> Result<Encoded, ProtocolError> {
    Ok(serde_json::to_string(payload)?.into())
}
