use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{FrameError, Result};
use crate::topic::validate_topic;

/// Default maximum frame length: 16 MiB.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Frame type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// `sub`: subscribe to a topic (outbound).
    Subscribe,
    /// `uns`: unsubscribe (outbound) or topic closed (inbound).
    Unsubscribe,
    /// `msg`: action dispatch (outbound) or data message (inbound).
    Message,
    /// `conn`: initial hydration payload for a topic (inbound).
    Connection,
    /// `req`: correlated request (outbound).
    Request,
    /// `res`: response to a `req` (inbound).
    Response,
    /// `err`: error response, or malformed-payload fallback (inbound).
    Error,
    /// `rej`: topic not servable yet (inbound).
    Rejected,
}

impl FrameType {
    /// The wire code for this frame type.
    pub fn code(self) -> &'static str {
        match self {
            FrameType::Subscribe => "sub",
            FrameType::Unsubscribe => "uns",
            FrameType::Message => "msg",
            FrameType::Connection => "conn",
            FrameType::Request => "req",
            FrameType::Response => "res",
            FrameType::Error => "err",
            FrameType::Rejected => "rej",
        }
    }

    /// Whether frames of this type carry a JSON body on the inbound path.
    pub fn carries_payload(self) -> bool {
        matches!(
            self,
            FrameType::Message | FrameType::Connection | FrameType::Response | FrameType::Error
        )
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for FrameType {
    type Err = FrameError;

    fn from_str(code: &str) -> Result<Self> {
        match code {
            "sub" => Ok(FrameType::Subscribe),
            "uns" => Ok(FrameType::Unsubscribe),
            "msg" => Ok(FrameType::Message),
            "conn" => Ok(FrameType::Connection),
            "req" => Ok(FrameType::Request),
            "res" => Ok(FrameType::Response),
            "err" => Ok(FrameType::Error),
            "rej" => Ok(FrameType::Rejected),
            other => Err(FrameError::UnknownType(other.to_string())),
        }
    }
}

/// A framed message with topic routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// What the frame means.
    pub kind: FrameType,
    /// The topic this frame belongs to.
    pub topic: String,
    /// The raw payload text (possibly empty).
    pub payload: String,
}

impl Frame {
    /// Create a new frame.
    pub fn new(kind: FrameType, topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind,
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// A `sub` frame for `topic`.
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self::new(FrameType::Subscribe, topic, String::new())
    }

    /// An `uns` frame for `topic`.
    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Self::new(FrameType::Unsubscribe, topic, String::new())
    }

    /// A frame whose payload is `value` serialized as JSON.
    pub fn json<T: Serialize>(kind: FrameType, topic: impl Into<String>, value: &T) -> Result<Self> {
        let payload = serde_json::to_string(value)?;
        Ok(Self::new(kind, topic, payload))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{},{}", self.kind, self.topic)
        } else {
            write!(f, "{},{},{}", self.kind, self.topic, self.payload)
        }
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// <type>,<topic>,<payload>
/// ```
/// Frames without a payload are written as `<type>,<topic>`.
pub fn encode_frame(frame: &Frame) -> Result<String> {
    validate_topic(&frame.topic)?;
    Ok(frame.to_string())
}

/// Decode a frame from one text message.
///
/// The payload is the remainder after the second comma and may itself
/// contain commas. A missing payload field (`rej,chat`) decodes as an empty
/// payload, same as a trailing comma (`rej,chat,`).
pub fn decode_frame(text: &str, config: &FrameConfig) -> Result<Frame> {
    if text.len() > config.max_frame_len {
        return Err(FrameError::FrameTooLarge {
            size: text.len(),
            max: config.max_frame_len,
        });
    }

    let mut fields = text.splitn(3, ',');
    let code = fields.next().unwrap_or_default();
    let topic = fields
        .next()
        .ok_or_else(|| FrameError::Malformed(format!("missing topic in frame '{code}'")))?;
    let payload = fields.next().unwrap_or_default();

    if topic.is_empty() {
        return Err(FrameError::Malformed("empty topic".to_string()));
    }

    let kind = code.parse::<FrameType>()?;
    Ok(Frame::new(kind, topic, payload))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum inbound frame length in bytes. Default: 16 MiB.
    pub max_frame_len: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}
