//! Drives the voice session against the credential endpoint and the external
//! audio room service.
//!
//! Every change goes through [`VoiceSession::handle`]; this controller only
//! performs the actions it returns. Room events are watched on a background
//! task that feeds them back in as session events.

use crate::state::ClientContext;
use finbuddy_core::{
    ControlFrame, Navigator, RedirectDispatcher,
    credentials::CredentialIssuer,
    identity,
    room::{RoomConfig, RoomConnector, RoomEvent, RoomEvents, RoomHandle},
    voice::{TransitionError, VoiceAction, VoiceEvent, VoiceSession, VoiceState},
};
use futures_util::{FutureExt, StreamExt, future::BoxFuture};
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, Weak,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error(transparent)]
    Rejected(#[from] TransitionError),
    #[error("Failed to obtain voice credentials: {0}")]
    Credentials(String),
    #[error("Audio room failed: {0}")]
    Room(String),
}

struct JoinedRoom {
    room_name: String,
    handle: Arc<dyn RoomHandle>,
}

struct Inner {
    user_id: String,
    server_url: String,
    issuer: Arc<dyn CredentialIssuer>,
    connector: Arc<dyn RoomConnector>,
    navigator: Arc<dyn Navigator>,
    session: Mutex<VoiceSession>,
    updates: watch::Sender<VoiceSession>,
    room: Mutex<Option<JoinedRoom>>,
    shutting_down: AtomicBool,
}

/// Owns the single voice session of a visit.
#[derive(Clone)]
pub struct VoiceSessionController {
    inner: Arc<Inner>,
}

impl VoiceSessionController {
    pub fn new(
        context: &ClientContext,
        issuer: Arc<dyn CredentialIssuer>,
        connector: Arc<dyn RoomConnector>,
    ) -> Self {
        Self::with_parts(
            context.config.user_id.clone(),
            context.config.livekit_url.clone(),
            issuer,
            connector,
            context.navigator(),
        )
    }

    pub fn with_parts(
        user_id: impl Into<String>,
        server_url: impl Into<String>,
        issuer: Arc<dyn CredentialIssuer>,
        connector: Arc<dyn RoomConnector>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let (updates, _) = watch::channel(VoiceSession::new());
        Self {
            inner: Arc::new(Inner {
                user_id: user_id.into(),
                server_url: server_url.into(),
                issuer,
                connector,
                navigator,
                session: Mutex::new(VoiceSession::new()),
                updates,
                room: Mutex::new(None),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn session(&self) -> VoiceSession {
        self.inner.session().clone()
    }

    /// Session snapshots, published after every transition.
    pub fn subscribe(&self) -> watch::Receiver<VoiceSession> {
        self.inner.updates.subscribe()
    }

    /// Requests a token for a fresh room and joins it.
    ///
    /// Only valid while `Idle`. On failure the session is left in `Error`
    /// until [`acknowledge`](Self::acknowledge) is called.
    #[instrument(skip(self), fields(user_id = %self.inner.user_id))]
    pub async fn start(&self) -> Result<(), VoiceError> {
        let room_name = identity::room_name();
        info!(%room_name, "Starting voice session");
        self.inner.drive(VoiceEvent::Start { room_name }).await
    }

    /// Leaves the room and returns to `Idle`. Only valid while `Active`.
    pub async fn stop(&self) -> Result<(), VoiceError> {
        self.inner.drive(VoiceEvent::Stop).await
    }

    /// Stores the mute intent and applies it to the room while `Active`.
    pub async fn set_muted(&self, muted: bool) -> Result<(), VoiceError> {
        self.inner.drive(VoiceEvent::SetMuted(muted)).await
    }

    /// Dismisses a surfaced error, returning to `Idle`.
    pub async fn acknowledge(&self) -> Result<(), VoiceError> {
        self.inner.drive(VoiceEvent::Acknowledge).await
    }

    /// Releases the room, if any. A join still in flight is discarded when
    /// it completes.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let state = self.inner.session().state;
        let result = match state {
            VoiceState::Active => self.stop().await,
            VoiceState::Error => self.acknowledge().await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!(error = %e, "Voice session did not shut down cleanly");
        }
    }
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, VoiceSession> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn room(&self) -> MutexGuard<'_, Option<JoinedRoom>> {
        self.room
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, event: VoiceEvent) -> Result<Vec<VoiceAction>, TransitionError> {
        let mut session = self.session();
        let actions = session.handle(event)?;
        self.updates.send_replace(session.clone());
        Ok(actions)
    }

    /// Whether `room_name` is the room of the current `Active` session.
    fn is_current(&self, room_name: &str) -> bool {
        let session = self.session();
        session.is_active() && session.room_name.as_deref() == Some(room_name)
    }

    /// Feeds `event` and every follow-up event through the state machine.
    ///
    /// Boxed because room watchers re-enter it.
    fn drive(self: &Arc<Self>, event: VoiceEvent) -> BoxFuture<'_, Result<(), VoiceError>> {
        async move {
            let mut outcome: Result<(), VoiceError> = Ok(());
            let mut queue = VecDeque::from([event]);
            while let Some(event) = queue.pop_front() {
                for action in self.transition(event)? {
                    if let Some(next) = self.perform(action, &mut outcome).await {
                        queue.push_back(next);
                    }
                }
            }
            outcome
        }
        .boxed()
    }

    async fn perform(
        self: &Arc<Self>,
        action: VoiceAction,
        outcome: &mut Result<(), VoiceError>,
    ) -> Option<VoiceEvent> {
        match action {
            VoiceAction::RequestToken { room_name } => {
                match self.issuer.issue_token(&self.user_id, &room_name).await {
                    Ok(token) => Some(VoiceEvent::TokenIssued { token, room_name }),
                    Err(e) => {
                        let reason = format!("{:#}", e);
                        *outcome = Err(VoiceError::Credentials(reason.clone()));
                        Some(VoiceEvent::TokenFailed { reason })
                    }
                }
            }
            VoiceAction::JoinRoom {
                token,
                room_name,
                microphone_enabled,
            } => {
                let config = RoomConfig {
                    server_url: self.server_url.clone(),
                    token,
                    room_name: room_name.clone(),
                    microphone_enabled,
                };
                match self.connector.join(config).await {
                    Ok((handle, events)) => {
                        self.install(room_name, microphone_enabled, handle.into(), events)
                            .await
                    }
                    Err(e) => {
                        let reason = format!("{:#}", e);
                        // The token is spent; nothing else releases this room.
                        self.release(&room_name).await;
                        *outcome = Err(VoiceError::Room(reason.clone()));
                        Some(VoiceEvent::RoomError { reason })
                    }
                }
            }
            VoiceAction::LeaveRoom => {
                let left = self.leave().await;
                if self.session().state != VoiceState::Stopping {
                    return None;
                }
                match left {
                    Ok(()) => Some(VoiceEvent::Stopped),
                    Err(reason) => {
                        *outcome = Err(VoiceError::Room(reason.clone()));
                        Some(VoiceEvent::RoomError { reason })
                    }
                }
            }
            VoiceAction::ApplyMute(muted) => {
                let handle = self.room().as_ref().map(|room| room.handle.clone());
                match handle {
                    Some(handle) => {
                        if let Err(e) = handle.set_microphone_enabled(!muted).await {
                            warn!(error = %e, muted, "Failed to apply mute to room");
                        }
                    }
                    None => debug!(muted, "No room joined yet; mute applies at join"),
                }
                None
            }
            VoiceAction::Surface(message) => {
                error!(%message, "Voice session failed");
                None
            }
        }
    }

    /// Keeps a freshly joined room, unless the session moved on meanwhile.
    async fn install(
        self: &Arc<Self>,
        room_name: String,
        microphone_enabled: bool,
        handle: Arc<dyn RoomHandle>,
        events: RoomEvents,
    ) -> Option<VoiceEvent> {
        let late = !self.is_current(&room_name);
        if late || self.shutting_down.load(Ordering::SeqCst) {
            info!(%room_name, "Discarding room joined after the session moved on");
            if let Err(e) = handle.disconnect().await {
                warn!(error = %e, "Failed to leave discarded room");
            }
            self.release(&room_name).await;
            return (!late).then_some(VoiceEvent::RoomClosed);
        }

        *self.room() = Some(JoinedRoom {
            room_name: room_name.clone(),
            handle: handle.clone(),
        });
        // The intent may have changed while the join was in flight.
        let muted = self.session().muted;
        if muted == microphone_enabled {
            if let Err(e) = handle.set_microphone_enabled(!muted).await {
                warn!(error = %e, "Failed to apply mute intent at join");
            }
        }

        let span = info_span!("voice_room", %room_name);
        tokio::spawn(watch_room(Arc::downgrade(self), room_name, events).instrument(span));
        info!("Voice session active");
        None
    }

    /// Disconnects the joined room, if any.
    async fn leave(&self) -> Result<(), String> {
        let Some(room) = self.room().take() else {
            return Ok(());
        };
        let result = room.handle.disconnect().await.map_err(|e| format!("{:#}", e));
        if let Err(reason) = &result {
            warn!(room_name = %room.room_name, %reason, "Failed to leave room");
        }
        self.release(&room.room_name).await;
        result
    }

    async fn release(&self, room_name: &str) {
        if let Err(e) = self.issuer.release(room_name).await {
            warn!(%room_name, error = %e, "Failed to release room");
        }
    }

    fn on_data(&self, payload: &[u8]) {
        let frame = std::str::from_utf8(payload)
            .ok()
            .and_then(ControlFrame::from_json);
        match frame {
            Some(frame) => {
                RedirectDispatcher::new(self.navigator.clone()).dispatch(&frame);
            }
            None => debug!(len = payload.len(), "Ignoring non-JSON room data"),
        }
    }

    async fn on_room_closed(self: &Arc<Self>, room_name: &str, reason: Option<String>) {
        info!(?reason, "Room disconnected");
        let taken = {
            let mut room = self.room();
            match room.as_ref() {
                Some(joined) if joined.room_name == room_name => room.take(),
                _ => None,
            }
        };
        if taken.is_some() {
            self.release(room_name).await;
        }
        if let Err(e) = self.drive(VoiceEvent::RoomClosed).await {
            debug!(error = %e, "Room closure raced another transition");
        }
    }

    async fn on_room_error(self: &Arc<Self>, reason: String) {
        if let Err(e) = self.drive(VoiceEvent::RoomError { reason }).await {
            debug!(error = %e, "Room error raced another transition");
        }
    }
}

/// Feeds room events back into the session until the room is left.
async fn watch_room(inner: Weak<Inner>, room_name: String, mut events: RoomEvents) {
    while let Some(event) = events.next().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if !inner.is_current(&room_name) {
            debug!(?event, "Ignoring event of a room that is no longer current");
            continue;
        }
        match event {
            RoomEvent::Data(payload) => inner.on_data(&payload),
            RoomEvent::Disconnected { reason } => {
                inner.on_room_closed(&room_name, reason).await;
                return;
            }
            RoomEvent::Error(reason) => {
                inner.on_room_error(reason).await;
                return;
            }
        }
    }
    debug!("Room event stream ended");
}
