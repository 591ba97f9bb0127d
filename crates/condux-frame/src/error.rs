/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame is missing its type or topic field.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame carries a type code this client does not understand.
    #[error("unknown frame type '{0}'")]
    UnknownType(String),

    /// The topic cannot be carried in a frame.
    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: &'static str },

    /// The frame exceeds the configured maximum size.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A payload could not be serialized to JSON.
    #[error("payload serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
