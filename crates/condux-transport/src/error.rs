/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to acquire a socket for the given target.
    #[error("failed to open {target}: {reason}")]
    Open { target: String, reason: String },

    /// The socket's other end has gone away.
    #[error("socket closed")]
    Closed,

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
