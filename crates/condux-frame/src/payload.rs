use serde_json::{json, Value};
use tracing::debug;

use crate::codec::{Frame, FrameType};

/// Message substituted for a payload that is not valid JSON.
pub const INVALID_PAYLOAD_MESSAGE: &str =
    "ERROR: invalid payload. Payload must be stringified JSON.";

/// The generic error body used when an inbound payload fails to parse.
pub fn invalid_payload() -> Value {
    json!({ "message": INVALID_PAYLOAD_MESSAGE })
}

/// Parse the JSON body of an inbound frame.
///
/// Frame types that carry a body (`msg`, `conn`, `res`, `err`) are parsed;
/// on failure the frame is re-tagged as `err` with [`invalid_payload`] as its
/// body. Other frame types yield `Value::Null` and keep their type.
pub fn decode_payload(frame: &Frame) -> (FrameType, Value) {
    if !frame.kind.carries_payload() {
        return (frame.kind, Value::Null);
    }

    match serde_json::from_str::<Value>(&frame.payload) {
        Ok(value) => (frame.kind, value),
        Err(err) => {
            debug!(
                topic = %frame.topic,
                kind = %frame.kind,
                error = %err,
                "substituting error payload for malformed frame body"
            );
            (FrameType::Error, invalid_payload())
        }
    }
}
