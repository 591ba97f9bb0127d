//! Reserved system topics.
//!
//! Two topic names are owned by the protocol itself and can never be
//! registered by an application. Every other non-empty name without a
//! comma is a user topic.

use crate::error::{FrameError, Result};

/// Outbound user actions (`{"actionType": ..., "payload": ...}`).
pub const CLIENT_ACTIONS: &str = "/CLIENT_ACTIONS";

/// Server-side topic registration notices.
pub const REGISTRATIONS: &str = "/REGISTRATIONS";

/// Returns true if the topic is one of the reserved system topics.
pub fn is_reserved(topic: &str) -> bool {
    topic == CLIENT_ACTIONS || topic == REGISTRATIONS
}

/// Check that a topic can be carried in the topic field of a frame.
///
/// The topic is the second comma-separated field, so it must be non-empty
/// and must not itself contain a comma.
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(FrameError::InvalidTopic {
            topic: topic.to_string(),
            reason: "topic must not be empty",
        });
    }
    if topic.contains(',') {
        return Err(FrameError::InvalidTopic {
            topic: topic.to_string(),
            reason: "topic must not contain ','",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_topics() {
        assert!(is_reserved(CLIENT_ACTIONS));
        assert!(is_reserved(REGISTRATIONS));
        assert!(!is_reserved("chat"));
        assert!(!is_reserved("/CLIENT_ACTIONS/extra"));
    }

    #[test]
    fn validate_rejects_empty_and_commas() {
        assert!(validate_topic("/chat").is_ok());
        assert!(matches!(
            validate_topic(""),
            Err(FrameError::InvalidTopic { .. })
        ));
        assert!(matches!(
            validate_topic("a,b"),
            Err(FrameError::InvalidTopic { .. })
        ));
    }
}
