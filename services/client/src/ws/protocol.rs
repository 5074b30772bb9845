//! Defines the JSON text-frame envelope of the control channel.

use finbuddy_core::ControlFrame;
use serde::Serialize;
use tracing::trace;

/// Decodes an inbound text frame.
///
/// Returns `None` for payloads that are not JSON; the backend uses those for
/// heartbeats and connection confirmations.
pub fn decode_inbound(text: &str) -> Option<ControlFrame> {
    let frame = ControlFrame::from_json(text);
    if frame.is_none() {
        trace!(payload = %text, "Ignoring non-JSON control message");
    }
    frame
}

/// Serializes an outbound message to a JSON text frame.
pub fn encode_outbound<T: Serialize>(message: &T) -> serde_json::Result<String> {
    serde_json::to_string(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_redirect_envelope() {
        assert_eq!(
            decode_inbound(r#"{"type":"redirect","redirect_to":"/goals"}"#),
            Some(ControlFrame::Redirect {
                target: "/goals".to_string()
            })
        );
    }

    #[test]
    fn test_decode_ignores_heartbeats() {
        assert_eq!(decode_inbound("ping"), None);
        assert_eq!(
            decode_inbound(r#"{"type":"connected","user_id":"user-abc1234"}"#),
            Some(ControlFrame::Unknown)
        );
    }

    #[test]
    fn test_encode_outbound() {
        let text = encode_outbound(&json!({"type": "ack"})).unwrap();
        assert_eq!(text, r#"{"type":"ack"}"#);
    }
}
