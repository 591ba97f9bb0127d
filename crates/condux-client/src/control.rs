use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of a `msg,/CLIENT_ACTIONS,...` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionMessage {
    #[serde(rename = "actionType")]
    pub action_type: String,
    pub payload: Value,
}

impl ActionMessage {
    pub fn new(action_type: impl Into<String>, payload: Value) -> Self {
        Self {
            action_type: action_type.into(),
            payload,
        }
    }
}

/// Body of a `req` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestEnvelope {
    pub request_token: String,
    pub constraints: Value,
}

/// A topic registration announced on `/REGISTRATIONS`.
///
/// Two body shapes are accepted: `{"registered": "<topic>"}` and
/// `{"topic": "<topic>", "status": "registered"}`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RegistrationNotice {
    Registered { registered: String },
    Status { topic: String, status: String },
}

impl RegistrationNotice {
    /// Parse a notice body; anything else on the registrations topic is ignored.
    pub fn parse(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }

    /// The topic that became servable, if the notice announces one.
    pub fn registered_topic(&self) -> Option<&str> {
        match self {
            RegistrationNotice::Registered { registered } => Some(registered),
            RegistrationNotice::Status { topic, status } if status == "registered" => Some(topic),
            RegistrationNotice::Status { .. } => None,
        }
    }
}

/// The correlation token carried by a `res` or `err` payload.
pub(crate) fn request_token(payload: &Value) -> Option<&str> {
    payload.get("request_token").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn action_message_wire_shape() {
        let message = ActionMessage::new("post", json!({ "text": "hi" }));
        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(encoded, json!({ "actionType": "post", "payload": { "text": "hi" } }));
    }

    #[test]
    fn request_envelope_wire_shape() {
        let envelope = RequestEnvelope {
            request_token: "t-1".to_string(),
            constraints: json!({ "limit": 5 }),
        };
        let encoded = serde_json::to_string(&envelope).unwrap();
        assert_eq!(encoded, r#"{"request_token":"t-1","constraints":{"limit":5}}"#);
    }

    #[test]
    fn registration_notice_shapes() {
        let v1 = RegistrationNotice::parse(&json!({ "registered": "chat" })).unwrap();
        assert_eq!(v1.registered_topic(), Some("chat"));

        let v2 = RegistrationNotice::parse(&json!({ "topic": "chat", "status": "registered" }))
            .unwrap();
        assert_eq!(v2.registered_topic(), Some("chat"));

        let other = RegistrationNotice::parse(&json!({ "topic": "chat", "status": "removed" }))
            .unwrap();
        assert_eq!(other.registered_topic(), None);

        assert!(RegistrationNotice::parse(&json!({ "message": "nope" })).is_none());
        assert!(RegistrationNotice::parse(&json!("chat")).is_none());
    }

    #[test]
    fn request_token_lookup() {
        assert_eq!(request_token(&json!({ "request_token": "abc" })), Some("abc"));
        assert_eq!(request_token(&json!({ "request_token": 5 })), None);
        assert_eq!(request_token(&json!([1, 2])), None);
    }
}
