//! Conversation State
//!
//! Holds the message log of one visit and the one-exchange-at-a-time guard.
//! Only the most recently appended assistant message is ever mutated, and
//! only while its exchange is pending.

use crate::{
    frame::ControlFrame,
    message::{Message, Sender},
};

/// Prefix of the text that replaces the pending reply on transport failure.
pub const CONNECTION_ERROR_PREFIX: &str = "Sorry, I'm having trouble connecting. Error: ";

/// Reasons a chat send is refused before any request is made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("A reply is still streaming; wait for it to finish")]
    Busy,
    #[error("Message is empty")]
    EmptyMessage,
}

/// What the exchange does after one frame has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameStep {
    /// Keep reading frames.
    Continue,
    /// A redirect ended the exchange. Navigating is up to the caller.
    Redirect(String),
    /// The exchange had already completed; the frame was dropped.
    Ended,
}

#[derive(Debug, Default, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
    pending: bool,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Whether an exchange currently holds the lock.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Starts an exchange: takes the lock, appends the user message and an
    /// empty assistant placeholder.
    pub fn begin(&mut self, text: &str) -> Result<(), ChatError> {
        if self.pending {
            return Err(ChatError::Busy);
        }
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        self.messages.push(Message::user(text));
        self.messages.push(Message::assistant_placeholder());
        self.pending = true;
        Ok(())
    }

    /// Replaces the pending reply with a cumulative snapshot.
    ///
    /// Has no effect once the exchange has completed.
    pub fn replace_pending(&mut self, text: String) {
        if let Some(reply) = self.pending_reply() {
            reply.text = text;
        }
    }

    /// Replaces the pending reply with a user-visible error string.
    pub fn fail(&mut self, detail: &str) {
        self.replace_pending(format!("{CONNECTION_ERROR_PREFIX}{detail}"));
    }

    /// Releases the lock. The reply is immutable from here on.
    pub fn complete(&mut self) {
        self.pending = false;
    }

    /// Applies one streamed frame to the pending exchange.
    pub fn apply_frame(&mut self, frame: ControlFrame) -> FrameStep {
        if !self.pending {
            return FrameStep::Ended;
        }
        match frame {
            ControlFrame::Content { text } => {
                self.replace_pending(text);
                FrameStep::Continue
            }
            ControlFrame::Redirect { target } => FrameStep::Redirect(target),
            ControlFrame::Unknown => FrameStep::Continue,
        }
    }

    fn pending_reply(&mut self) -> Option<&mut Message> {
        if !self.pending {
            return None;
        }
        self.messages
            .last_mut()
            .filter(|m| m.sender == Sender::Assistant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(text: &str) -> ControlFrame {
        ControlFrame::Content {
            text: text.to_string(),
        }
    }

    #[test]
    fn test_begin_appends_user_and_placeholder() {
        let mut conversation = Conversation::new();
        conversation.begin("Hello").unwrap();

        let messages = conversation.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[0].text, "Hello");
        assert_eq!(messages[1].sender, Sender::Assistant);
        assert!(messages[1].text.is_empty());
        assert!(conversation.is_pending());
    }

    #[test]
    fn test_second_begin_is_rejected_while_pending() {
        let mut conversation = Conversation::new();
        conversation.begin("one").unwrap();
        assert_eq!(conversation.begin("two"), Err(ChatError::Busy));
        assert_eq!(conversation.messages().len(), 2);

        conversation.complete();
        assert!(conversation.begin("two").is_ok());
    }

    #[test]
    fn test_blank_input_is_rejected() {
        let mut conversation = Conversation::new();
        assert_eq!(conversation.begin("   "), Err(ChatError::EmptyMessage));
        assert!(conversation.messages().is_empty());
        assert!(!conversation.is_pending());
    }

    #[test]
    fn test_content_frames_replace_rather_than_append() {
        let mut conversation = Conversation::new();
        conversation.begin("hi").unwrap();

        conversation.apply_frame(content("Hel"));
        conversation.apply_frame(content("Hello"));

        assert_eq!(conversation.messages()[1].text, "Hello");
    }

    #[test]
    fn test_redirect_stops_the_exchange_without_touching_the_reply() {
        let mut conversation = Conversation::new();
        conversation.begin("hi").unwrap();

        assert_eq!(
            conversation.apply_frame(content("partial")),
            FrameStep::Continue
        );
        let redirect = ControlFrame::Redirect {
            target: "/x".to_string(),
        };
        assert_eq!(
            conversation.apply_frame(redirect),
            FrameStep::Redirect("/x".to_string())
        );
        assert_eq!(conversation.messages()[1].text, "partial");
    }

    #[test]
    fn test_unknown_frames_are_ignored() {
        let mut conversation = Conversation::new();
        conversation.begin("hi").unwrap();
        conversation.apply_frame(content("a"));

        assert_eq!(
            conversation.apply_frame(ControlFrame::Unknown),
            FrameStep::Continue
        );
        assert_eq!(conversation.messages()[1].text, "a");
    }

    #[test]
    fn test_completed_reply_is_immutable() {
        let mut conversation = Conversation::new();
        conversation.begin("hi").unwrap();
        conversation.apply_frame(content("done"));
        conversation.complete();

        conversation.replace_pending("late".to_string());
        conversation.fail("late failure");
        assert_eq!(
            conversation.apply_frame(content("late")),
            FrameStep::Ended
        );
        assert_eq!(conversation.messages()[1].text, "done");
    }

    #[test]
    fn test_failure_replaces_reply_with_error_text() {
        let mut conversation = Conversation::new();
        conversation.begin("hi").unwrap();
        conversation.replace_pending("half".to_string());
        conversation.fail("connection reset");

        assert_eq!(
            conversation.messages()[1].text,
            "Sorry, I'm having trouble connecting. Error: connection reset"
        );
    }
}
