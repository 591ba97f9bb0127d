//! Text frame codec for topic-multiplexed duplex connections.
//!
//! Every message on the wire is a single text frame:
//! - A short type code (`sub`, `msg`, `conn`, ...)
//! - The topic the frame belongs to
//! - An optional JSON payload (everything after the second comma)
//!
//! No partial frames: the transport below delivers whole text frames.

pub mod codec;
pub mod error;
pub mod payload;
pub mod topic;

pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, FrameType, DEFAULT_MAX_FRAME_LEN};
pub use error::{FrameError, Result};
pub use payload::{decode_payload, invalid_payload, INVALID_PAYLOAD_MESSAGE};
pub use topic::{is_reserved, validate_topic, CLIENT_ACTIONS, REGISTRATIONS};
