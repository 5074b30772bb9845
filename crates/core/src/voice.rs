//! Voice Session State
//!
//! `Idle → Requesting → Active → Stopping → Idle`, with `Error → Idle` on
//! acknowledgement. All transitions go through [`VoiceSession::handle`], which
//! rejects events that are not valid in the current state, so overlapping
//! start/stop sequences cannot interleave.

use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceState {
    Idle,
    Requesting,
    Active,
    Stopping,
    Error,
}

impl fmt::Display for VoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceState::Idle => write!(f, "idle"),
            VoiceState::Requesting => write!(f, "requesting"),
            VoiceState::Active => write!(f, "active"),
            VoiceState::Stopping => write!(f, "stopping"),
            VoiceState::Error => write!(f, "error"),
        }
    }
}

/// Inputs to the voice state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    /// The user asked to start a session in a freshly named room.
    Start { room_name: String },
    /// The credential endpoint issued a token for `room_name`.
    TokenIssued { token: String, room_name: String },
    /// The credential endpoint failed.
    TokenFailed { reason: String },
    /// The user asked to stop.
    Stop,
    /// The room capability finished disconnecting after `Stop`.
    Stopped,
    /// The room closed without the user asking.
    RoomClosed,
    /// The room capability reported a connection error.
    RoomError { reason: String },
    /// The user acknowledged a surfaced error.
    Acknowledge,
    /// The user changed the mute intent.
    SetMuted(bool),
}

impl VoiceEvent {
    fn name(&self) -> &'static str {
        match self {
            VoiceEvent::Start { .. } => "start",
            VoiceEvent::TokenIssued { .. } => "token_issued",
            VoiceEvent::TokenFailed { .. } => "token_failed",
            VoiceEvent::Stop => "stop",
            VoiceEvent::Stopped => "stopped",
            VoiceEvent::RoomClosed => "room_closed",
            VoiceEvent::RoomError { .. } => "room_error",
            VoiceEvent::Acknowledge => "acknowledge",
            VoiceEvent::SetMuted(_) => "set_muted",
        }
    }
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceAction {
    RequestToken { room_name: String },
    JoinRoom {
        token: String,
        room_name: String,
        microphone_enabled: bool,
    },
    LeaveRoom,
    /// Push the mute intent to the joined room.
    ApplyMute(bool),
    /// Show an alert-level message to the user.
    Surface(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Voice event `{event}` is not valid while {state}")]
pub struct TransitionError {
    pub state: VoiceState,
    pub event: &'static str,
}

/// The one voice session of a user context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceSession {
    pub state: VoiceState,
    pub token: Option<String>,
    pub room_name: Option<String>,
    pub muted: bool,
    /// The surfaced failure while in `Error`.
    pub error: Option<String>,
}

impl Default for VoiceSession {
    fn default() -> Self {
        Self {
            state: VoiceState::Idle,
            token: None,
            room_name: None,
            muted: false,
            error: None,
        }
    }
}

impl VoiceSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.state == VoiceState::Active
    }

    /// The single transition function.
    pub fn handle(&mut self, event: VoiceEvent) -> Result<Vec<VoiceAction>, TransitionError> {
        let rejected = TransitionError {
            state: self.state,
            event: event.name(),
        };

        let actions = match (self.state, event) {
            (VoiceState::Idle, VoiceEvent::Start { room_name }) => {
                self.state = VoiceState::Requesting;
                vec![VoiceAction::RequestToken { room_name }]
            }
            (VoiceState::Requesting, VoiceEvent::TokenIssued { token, room_name }) => {
                self.state = VoiceState::Active;
                self.token = Some(token.clone());
                self.room_name = Some(room_name.clone());
                vec![VoiceAction::JoinRoom {
                    token,
                    room_name,
                    microphone_enabled: !self.muted,
                }]
            }
            (VoiceState::Requesting, VoiceEvent::TokenFailed { reason }) => {
                self.fail(reason.clone());
                vec![VoiceAction::Surface(reason)]
            }
            (VoiceState::Active, VoiceEvent::Stop) => {
                self.state = VoiceState::Stopping;
                vec![VoiceAction::LeaveRoom]
            }
            (VoiceState::Stopping, VoiceEvent::Stopped)
            | (VoiceState::Stopping, VoiceEvent::RoomClosed)
            | (VoiceState::Active, VoiceEvent::RoomClosed) => {
                self.reset();
                Vec::new()
            }
            (VoiceState::Active, VoiceEvent::RoomError { reason }) => {
                self.fail(reason.clone());
                vec![VoiceAction::LeaveRoom, VoiceAction::Surface(reason)]
            }
            (VoiceState::Stopping, VoiceEvent::RoomError { reason }) => {
                self.fail(reason.clone());
                vec![VoiceAction::Surface(reason)]
            }
            (VoiceState::Error, VoiceEvent::Acknowledge) => {
                self.reset();
                Vec::new()
            }
            (state, VoiceEvent::SetMuted(muted)) => {
                self.muted = muted;
                if state == VoiceState::Active {
                    vec![VoiceAction::ApplyMute(muted)]
                } else {
                    debug!(%state, muted, "Mute intent stored until a session is active");
                    Vec::new()
                }
            }
            _ => {
                warn!(state = %rejected.state, event = rejected.event, "Voice event rejected");
                return Err(rejected);
            }
        };

        info!(from = %rejected.state, to = %self.state, event = rejected.event, "Voice transition");
        Ok(actions)
    }

    fn fail(&mut self, reason: String) {
        self.state = VoiceState::Error;
        self.token = None;
        self.room_name = None;
        self.error = Some(reason);
    }

    fn reset(&mut self) {
        self.state = VoiceState::Idle;
        self.token = None;
        self.room_name = None;
        self.error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(session: &mut VoiceSession) {
        session
            .handle(VoiceEvent::Start {
                room_name: "room-abc1234".into(),
            })
            .unwrap();
    }

    fn active_session() -> VoiceSession {
        let mut session = VoiceSession::new();
        start(&mut session);
        session
            .handle(VoiceEvent::TokenIssued {
                token: "jwt".into(),
                room_name: "room-abc1234".into(),
            })
            .unwrap();
        session
    }

    #[test]
    fn test_full_lifecycle() {
        let mut session = VoiceSession::new();
        assert_eq!(
            session
                .handle(VoiceEvent::Start {
                    room_name: "room-1".into()
                })
                .unwrap(),
            vec![VoiceAction::RequestToken {
                room_name: "room-1".into()
            }]
        );
        assert_eq!(session.state, VoiceState::Requesting);
        assert_eq!(session.token, None);
        assert_eq!(session.room_name, None);

        let actions = session
            .handle(VoiceEvent::TokenIssued {
                token: "jwt".into(),
                room_name: "room-1".into(),
            })
            .unwrap();
        assert_eq!(
            actions,
            vec![VoiceAction::JoinRoom {
                token: "jwt".into(),
                room_name: "room-1".into(),
                microphone_enabled: true,
            }]
        );
        assert_eq!(session.state, VoiceState::Active);
        assert_eq!(session.token.as_deref(), Some("jwt"));
        assert_eq!(session.room_name.as_deref(), Some("room-1"));

        assert_eq!(
            session.handle(VoiceEvent::Stop).unwrap(),
            vec![VoiceAction::LeaveRoom]
        );
        assert_eq!(session.state, VoiceState::Stopping);

        assert!(session.handle(VoiceEvent::Stopped).unwrap().is_empty());
        assert_eq!(session, VoiceSession::new());
    }

    #[test]
    fn test_start_while_active_is_rejected() {
        let mut session = active_session();
        let err = session
            .handle(VoiceEvent::Start {
                room_name: "room-2".into(),
            })
            .unwrap_err();
        assert_eq!(err.state, VoiceState::Active);
        assert_eq!(session.room_name.as_deref(), Some("room-abc1234"));
    }

    #[test]
    fn test_start_while_requesting_is_rejected() {
        let mut session = VoiceSession::new();
        start(&mut session);
        assert!(
            session
                .handle(VoiceEvent::Start {
                    room_name: "room-2".into()
                })
                .is_err()
        );
        assert_eq!(session.state, VoiceState::Requesting);
    }

    #[test]
    fn test_token_failure_goes_through_error_to_idle() {
        let mut session = VoiceSession::new();
        start(&mut session);
        assert_eq!(
            session
                .handle(VoiceEvent::TokenFailed {
                    reason: "LiveKit server not configured".into()
                })
                .unwrap(),
            vec![VoiceAction::Surface("LiveKit server not configured".into())]
        );
        assert_eq!(session.state, VoiceState::Error);
        assert_eq!(session.token, None);
        assert_eq!(session.room_name, None);

        // Nothing else happens until the error is acknowledged.
        assert!(
            session
                .handle(VoiceEvent::Start {
                    room_name: "room-3".into()
                })
                .is_err()
        );
        session.handle(VoiceEvent::Acknowledge).unwrap();
        assert_eq!(session.state, VoiceState::Idle);
        assert_eq!(session.error, None);
        assert_eq!(session.token, None);
        assert_eq!(session.room_name, None);
    }

    #[test]
    fn test_stop_is_only_valid_while_active() {
        let mut session = VoiceSession::new();
        assert!(session.handle(VoiceEvent::Stop).is_err());
        start(&mut session);
        assert!(session.handle(VoiceEvent::Stop).is_err());

        let mut session = active_session();
        session.handle(VoiceEvent::Stop).unwrap();
        assert!(session.handle(VoiceEvent::Stop).is_err());
    }

    #[test]
    fn test_room_error_while_active_leaves_and_surfaces() {
        let mut session = active_session();
        let actions = session
            .handle(VoiceEvent::RoomError {
                reason: "ICE failed".into(),
            })
            .unwrap();
        assert_eq!(
            actions,
            vec![
                VoiceAction::LeaveRoom,
                VoiceAction::Surface("ICE failed".into())
            ]
        );
        assert_eq!(session.state, VoiceState::Error);
        assert_eq!(session.token, None);
        assert_eq!(session.room_name, None);
        assert_eq!(session.error.as_deref(), Some("ICE failed"));
    }

    #[test]
    fn test_unrequested_room_close_returns_to_idle() {
        let mut session = active_session();
        session.handle(VoiceEvent::RoomClosed).unwrap();
        assert_eq!(session.state, VoiceState::Idle);
        assert_eq!(session.token, None);
        assert!(session.handle(VoiceEvent::RoomClosed).is_err());
    }

    #[test]
    fn test_mute_intent_applies_only_while_active() {
        let mut session = VoiceSession::new();
        assert!(session.handle(VoiceEvent::SetMuted(true)).unwrap().is_empty());
        assert!(session.muted);

        start(&mut session);
        let actions = session
            .handle(VoiceEvent::TokenIssued {
                token: "jwt".into(),
                room_name: "room-abc1234".into(),
            })
            .unwrap();
        assert_eq!(
            actions,
            vec![VoiceAction::JoinRoom {
                token: "jwt".into(),
                room_name: "room-abc1234".into(),
                microphone_enabled: false,
            }]
        );

        assert_eq!(
            session.handle(VoiceEvent::SetMuted(false)).unwrap(),
            vec![VoiceAction::ApplyMute(false)]
        );
        assert!(!session.muted);
    }
}
