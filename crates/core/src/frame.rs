//! Control Frames
//!
//! A control frame is one decoded logical message taken from either the chat
//! stream or the control channel. Both sources share the same JSON payload
//! shapes, so classification lives here and nowhere else.

use serde_json::Value;

/// The `type` value that marks a redirect envelope.
pub const REDIRECT_TYPE: &str = "redirect";

/// One decoded logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// A cumulative snapshot of the assistant's reply.
    Content { text: String },
    /// A request to navigate the client to `target`.
    Redirect { target: String },
    /// Valid JSON with no recognised shape (heartbeats, acks).
    Unknown,
}

impl ControlFrame {
    /// Parses a JSON payload into a frame.
    ///
    /// Returns `None` when the payload is not valid JSON; callers drop such
    /// payloads and keep processing.
    pub fn from_json(payload: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => Some(Self::from_value(&value)),
            Err(e) => {
                tracing::debug!(error = %e, "Dropping payload that is not valid JSON");
                None
            }
        }
    }

    /// Classifies an already-parsed payload.
    ///
    /// A redirect needs both `type == "redirect"` and a non-empty string
    /// `redirect_to`.
    /// Otherwise a string `content` field makes a content frame.
    pub fn from_value(value: &Value) -> Self {
        if value.get("type").and_then(Value::as_str) == Some(REDIRECT_TYPE) {
            return match value
                .get("redirect_to")
                .and_then(Value::as_str)
                .filter(|target| !target.is_empty())
            {
                Some(target) => Self::Redirect {
                    target: target.to_string(),
                },
                None => Self::Unknown,
            };
        }
        match value.get("content").and_then(Value::as_str) {
            Some(text) => Self::Content {
                text: text.to_string(),
            },
            None => Self::Unknown,
        }
    }

    /// Returns the redirect target if this is a redirect frame.
    pub fn redirect_target(&self) -> Option<&str> {
        match self {
            Self::Redirect { target } => Some(target),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_payload() {
        let frame = ControlFrame::from_json(r#"{"content":"Hi"}"#);
        assert_eq!(
            frame,
            Some(ControlFrame::Content {
                text: "Hi".to_string()
            })
        );
    }

    #[test]
    fn test_redirect_payload() {
        let frame = ControlFrame::from_json(r#"{"type":"redirect","redirect_to":"/analysis"}"#)
            .expect("valid json");
        assert_eq!(frame.redirect_target(), Some("/analysis"));
    }

    #[test]
    fn test_redirect_takes_precedence_over_content() {
        let frame =
            ControlFrame::from_json(r#"{"type":"redirect","redirect_to":"/x","content":"c"}"#);
        assert_eq!(
            frame,
            Some(ControlFrame::Redirect {
                target: "/x".to_string()
            })
        );
    }

    #[test]
    fn test_unrecognised_shapes_are_unknown() {
        for payload in [
            r#"{"type":"connected"}"#,
            r#"{"type":"redirect"}"#,
            r#"{"type":"redirect","redirect_to":42}"#,
            r#"{"type":"redirect","redirect_to":""}"#,
            r#"{"content":null}"#,
            r#"[1,2,3]"#,
            r#""heartbeat""#,
        ] {
            assert_eq!(
                ControlFrame::from_json(payload),
                Some(ControlFrame::Unknown),
                "payload: {payload}"
            );
        }
    }

    #[test]
    fn test_invalid_json_is_dropped() {
        assert_eq!(ControlFrame::from_json("{bad json}"), None);
        assert_eq!(ControlFrame::from_json(""), None);
    }
}
