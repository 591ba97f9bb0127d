use std::fmt;

use condux_client::ClientError;
use condux_frame::FrameError;
use condux_transport::TransportError;

// Exit codes follow the rsfulmen table.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::InvalidTopic { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        FrameError::Json(_) | FrameError::FrameTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn client_error(context: &str, err: ClientError) -> CliError {
    match err {
        ClientError::Transport(err) => transport_error(context, err),
        ClientError::Frame(err) => frame_error(context, err),
        ClientError::ReservedTopic(_) => CliError::new(USAGE, format!("{context}: {err}")),
        ClientError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ClientError::NotConnected(_) | ClientError::Disconnected => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        ClientError::Remote { .. } | ClientError::ChannelClosed(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn client_errors_map_to_exit_codes() {
        let timeout = client_error("request", ClientError::Timeout(Duration::from_secs(1)));
        assert_eq!(timeout.code, TIMEOUT);
        assert!(timeout.message.starts_with("request: "));

        let reserved = client_error("listen", ClientError::ReservedTopic("/REGISTRATIONS".into()));
        assert_eq!(reserved.code, USAGE);

        let refused = client_error("connect", ClientError::Transport(TransportError::Closed));
        assert_eq!(refused.code, TRANSPORT_ERROR);

        let remote = client_error(
            "request",
            ClientError::Remote {
                topic: "lookup".into(),
                payload: serde_json::json!({ "message": "denied" }),
            },
        );
        assert_eq!(remote.code, FAILURE);
    }
}
