//! Drives one chat exchange at a time over a streamed HTTP POST.
//!
//! The conversation itself lives in [`Conversation`]; this controller owns the
//! request, feeds the response body through the frame parser, and publishes a
//! snapshot of the message list after every change.

use crate::state::ClientContext;
use finbuddy_core::{
    Navigator, RedirectDispatcher,
    chat::{ChatError, Conversation, FrameStep},
    message::Message,
    parser::frames,
};
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Request body of `POST /agent/chat`.
#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    message: &'a str,
    session_id: &'a str,
    user_id: i64,
}

/// How an accepted exchange ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// The response body ended; the reply holds the last snapshot.
    Completed,
    /// A redirect ended the exchange and navigation was triggered.
    Redirected { target: String },
    /// The transport failed; the reply holds the error text.
    Failed { error: String },
}

struct Shared {
    conversation: Mutex<Conversation>,
    snapshots: watch::Sender<Vec<Message>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Conversation> {
        self.conversation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` against the conversation and publishes the result.
    fn update<R>(&self, f: impl FnOnce(&mut Conversation) -> R) -> R {
        let mut conversation = self.lock();
        let result = f(&mut conversation);
        self.snapshots.send_replace(conversation.messages().to_vec());
        result
    }
}

/// Releases the in-flight lock however the exchange ends, including when the
/// exchange future is dropped mid-stream.
struct PendingGuard<'a> {
    shared: &'a Shared,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.update(Conversation::complete);
    }
}

#[derive(Clone)]
pub struct ChatSessionController {
    http: reqwest::Client,
    chat_url: String,
    session_id: String,
    user_id: i64,
    navigator: Arc<dyn Navigator>,
    shared: Arc<Shared>,
}

impl ChatSessionController {
    pub fn new(context: &ClientContext) -> Self {
        Self::with_endpoint(
            context.http.clone(),
            context.config.chat_url(),
            context.config.user_id.clone(),
            context.config.chat_user_id,
            context.navigator(),
        )
    }

    pub fn with_endpoint(
        http: reqwest::Client,
        chat_url: impl Into<String>,
        session_id: impl Into<String>,
        user_id: i64,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let (snapshots, _) = watch::channel(Vec::new());
        Self {
            http,
            chat_url: chat_url.into(),
            session_id: session_id.into(),
            user_id,
            navigator,
            shared: Arc::new(Shared {
                conversation: Mutex::new(Conversation::new()),
                snapshots,
            }),
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.lock().messages().to_vec()
    }

    /// Snapshots of the message list, published after every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.shared.snapshots.subscribe()
    }

    pub fn is_pending(&self) -> bool {
        self.shared.lock().is_pending()
    }

    /// Sends `text` and streams the reply into the conversation.
    ///
    /// Refused with [`ChatError::Busy`] while another exchange is in flight.
    /// Once accepted, every failure is reported in the reply itself and the
    /// lock is released before this returns.
    #[instrument(skip(self, text), fields(session_id = %self.session_id))]
    pub async fn send(&self, text: &str) -> Result<ExchangeOutcome, ChatError> {
        self.shared.update(|conversation| conversation.begin(text))?;
        let _guard = PendingGuard {
            shared: &self.shared,
        };
        info!("Chat exchange started");

        let outcome = match self.exchange(text).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let error = format!("{:#}", e);
                warn!(%error, "Chat exchange failed");
                self.shared.update(|conversation| conversation.fail(&error));
                ExchangeOutcome::Failed { error }
            }
        };
        info!(?outcome, "Chat exchange finished");
        Ok(outcome)
    }

    async fn exchange(&self, text: &str) -> anyhow::Result<ExchangeOutcome> {
        let request = ChatRequest {
            message: text,
            session_id: &self.session_id,
            user_id: self.user_id,
        };
        let response = self
            .http
            .post(&self.chat_url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let mut stream = std::pin::pin!(frames(response.bytes_stream()));
        while let Some(frame) = stream.next().await {
            let frame = frame?;
            debug!(?frame, "Chat frame");
            let step = self
                .shared
                .update(|conversation| conversation.apply_frame(frame));
            match step {
                FrameStep::Continue => {}
                // Navigate only after the conversation lock is released.
                FrameStep::Redirect(target) => {
                    RedirectDispatcher::new(self.navigator.clone()).redirect(&target);
                    return Ok(ExchangeOutcome::Redirected { target });
                }
                FrameStep::Ended => return Ok(ExchangeOutcome::Completed),
            }
        }
        Ok(ExchangeOutcome::Completed)
    }
}
