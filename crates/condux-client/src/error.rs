use std::time::Duration;

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] condux_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] condux_frame::FrameError),

    /// A request was issued while the connection is not established.
    #[error("cannot request on '{0}': not connected")]
    NotConnected(String),

    /// The channel was closed locally or by the server.
    #[error("channel '{0}' is closed")]
    ChannelClosed(String),

    /// The connection dropped while the operation was in flight.
    #[error("connection dropped")]
    Disconnected,

    /// The topic name is reserved for protocol traffic.
    #[error("topic '{0}' is reserved")]
    ReservedTopic(String),

    /// The server answered a request with an `err` frame.
    #[error("server rejected request on '{topic}': {payload}")]
    Remote {
        topic: String,
        payload: serde_json::Value,
    },

    /// Request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The client that owned this handle has been dropped.
    #[error("client dropped")]
    ClientDropped,
}

pub type Result<T> = std::result::Result<T, ClientError>;
