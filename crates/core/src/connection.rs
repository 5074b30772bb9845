//! Control-channel lifecycle as a pure state machine.
//!
//! Every socket lifecycle event and every caller request is funnelled through
//! [`ConnectionMachine::handle`], which returns the side effects the I/O
//! driver has to perform. The machine owns the reconnect decision and the
//! pending-timer guard; the driver owns the socket and the timer.
//!
//! Reconnection is unbounded at a fixed cadence: an endpoint that never comes
//! back is retried every `reconnect_delay` for as long as the machine lives.

use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Close code of an intentional, normal closure. Any other code is abnormal.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Code reported when the transport dropped without a close handshake.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Code reported for a close frame that carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// Backoff before a reconnect attempt after an abnormal closure.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Inputs to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The caller asks for a connection.
    Connect,
    /// The socket finished its opening handshake.
    Opened,
    /// The socket closed with `code`.
    Closed { code: u16, reason: String },
    /// The transport reported an error. Closure follows separately.
    TransportError(String),
    /// The pending reconnect timer fired.
    ReconnectElapsed,
    /// The caller asks to close the socket with `code`.
    CloseRequested { code: u16, reason: String },
    /// The owning context is being torn down.
    Shutdown,
}

/// Side effects requested by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a new socket, discarding any previous one.
    OpenSocket,
    /// Arm the single reconnect timer.
    ScheduleReconnect(Duration),
    /// Disarm the reconnect timer.
    CancelReconnect,
    /// Send a close frame on the current socket.
    CloseSocket { code: u16, reason: String },
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    reconnect_delay: Duration,
    reconnect_pending: bool,
    shut_down: bool,
}

impl ConnectionMachine {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Closed,
            reconnect_delay,
            reconnect_pending: false,
            shut_down: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a reconnect timer is currently armed.
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// The single transition function.
    pub fn handle(&mut self, event: ConnectionEvent) -> Vec<ConnectionAction> {
        if self.shut_down {
            debug!(?event, "Ignoring event after shutdown");
            return Vec::new();
        }

        match event {
            ConnectionEvent::Connect => match self.state {
                ConnectionState::Connecting | ConnectionState::Open => {
                    debug!(state = %self.state, "Connect ignored; already connecting or open");
                    Vec::new()
                }
                ConnectionState::Closed | ConnectionState::Reconnecting => {
                    let mut actions = self.take_timer();
                    self.state = ConnectionState::Connecting;
                    actions.push(ConnectionAction::OpenSocket);
                    actions
                }
            },
            ConnectionEvent::Opened => {
                info!("Control channel connected");
                self.state = ConnectionState::Open;
                self.take_timer()
            }
            ConnectionEvent::TransportError(error) => {
                warn!(%error, "Control channel transport error");
                Vec::new()
            }
            ConnectionEvent::Closed { code, reason } => {
                info!(code, %reason, "Control channel disconnected");
                if code == NORMAL_CLOSURE {
                    self.state = ConnectionState::Closed;
                    return self.take_timer();
                }
                self.state = ConnectionState::Reconnecting;
                if self.reconnect_pending {
                    debug!("Reconnect already scheduled");
                    return Vec::new();
                }
                info!(delay = ?self.reconnect_delay, "Scheduling reconnect");
                self.reconnect_pending = true;
                vec![ConnectionAction::ScheduleReconnect(self.reconnect_delay)]
            }
            ConnectionEvent::ReconnectElapsed => {
                if !self.reconnect_pending {
                    debug!("Stale reconnect timer ignored");
                    return Vec::new();
                }
                self.reconnect_pending = false;
                self.state = ConnectionState::Connecting;
                vec![ConnectionAction::OpenSocket]
            }
            ConnectionEvent::CloseRequested { code, reason } => match self.state {
                ConnectionState::Open | ConnectionState::Connecting => {
                    vec![ConnectionAction::CloseSocket { code, reason }]
                }
                ConnectionState::Closed | ConnectionState::Reconnecting => {
                    if code == NORMAL_CLOSURE {
                        self.state = ConnectionState::Closed;
                        self.take_timer()
                    } else {
                        Vec::new()
                    }
                }
            },
            ConnectionEvent::Shutdown => {
                let mut actions = self.take_timer();
                if matches!(
                    self.state,
                    ConnectionState::Open | ConnectionState::Connecting
                ) {
                    actions.push(ConnectionAction::CloseSocket {
                        code: NORMAL_CLOSURE,
                        reason: "Client shutting down".to_string(),
                    });
                }
                self.state = ConnectionState::Closed;
                self.shut_down = true;
                actions
            }
        }
    }

    fn take_timer(&mut self) -> Vec<ConnectionAction> {
        if std::mem::take(&mut self.reconnect_pending) {
            vec![ConnectionAction::CancelReconnect]
        } else {
            Vec::new()
        }
    }
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY)
    }
}
