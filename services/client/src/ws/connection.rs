//! Manages the control-channel WebSocket for one visitor.
//!
//! A single driver task owns the socket, the in-flight handshake and the one
//! reconnect timer. Every lifecycle event is fed to a [`ConnectionMachine`],
//! and the driver performs whatever actions it returns. Callers talk to the
//! driver over a command channel and observe it through a state watch, a
//! broadcast of every state transition and a broadcast of inbound frames.

use super::protocol::{decode_inbound, encode_outbound};
use finbuddy_core::{
    ControlFrame, Navigator, RedirectDispatcher,
    connection::{
        ABNORMAL_CLOSURE, ConnectionAction, ConnectionEvent, ConnectionMachine, ConnectionState,
        NO_STATUS_RECEIVED,
    },
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::{future::Future, pin::Pin, sync::Arc, time::Duration};
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
    time::Sleep,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self, Message as WsMessage,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Handshake = Pin<Box<dyn Future<Output = Result<Socket, tungstenite::Error>> + Send>>;

const FRAME_BUFFER: usize = 64;
const TRANSITION_BUFFER: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Control channel is not open (currently {0})")]
    NotOpen(ConnectionState),
    #[error("Control channel has been shut down")]
    Closed,
    #[error("Failed to encode control message: {0}")]
    Encode(#[from] serde_json::Error),
}

enum Command {
    Connect,
    Send(String),
    Close { code: u16, reason: String },
}

/// Handle to the control channel. Dropping it closes the channel with the
/// normal-closure code.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
    frames: broadcast::Sender<ControlFrame>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Starts the driver and opens the channel to `url`.
    pub fn spawn(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Closed);
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        let (frames, _) = broadcast::channel(FRAME_BUFFER);
        let cancel = CancellationToken::new();

        let driver = Driver {
            url: url.into(),
            machine: ConnectionMachine::new(reconnect_delay),
            socket: None,
            handshake: None,
            timer: None,
            closing: None,
            state: state_tx,
            transitions: transitions.clone(),
            frames: frames.clone(),
        };
        let task = tokio::spawn(driver.run(command_rx, cancel.clone()));

        let manager = Self {
            commands,
            state,
            transitions,
            frames,
            cancel,
            task: Some(task),
        };
        manager.connect();
        manager
    }

    /// Opens the channel unless a connection is already open or in flight.
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Sends `message` as a JSON text frame. Only delivered while `Open`.
    pub fn send<T: Serialize>(&self, message: &T) -> Result<(), ConnectionError> {
        let state = self.state();
        if state != ConnectionState::Open {
            warn!(%state, "Dropping outbound control message; channel not open");
            return Err(ConnectionError::NotOpen(state));
        }
        let text = encode_outbound(message)?;
        self.commands
            .send(Command::Send(text))
            .map_err(|_| ConnectionError::Closed)
    }

    /// Closes the channel with `code`. `1000` suppresses reconnection.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.commands.send(Command::Close {
            code,
            reason: reason.into(),
        });
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// The latest state. Transitions that pass between two polls are skipped;
    /// use [`transitions`](Self::transitions) to see every one.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Every state change after subscribing, in order.
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions.subscribe()
    }

    /// Inbound frames, in arrival order. Non-JSON payloads never appear here.
    pub fn subscribe(&self) -> broadcast::Receiver<ControlFrame> {
        self.frames.subscribe()
    }

    /// Navigates on every redirect received over the channel.
    ///
    /// Each inbound message is its own exchange, so each redirect navigates.
    pub fn forward_redirects(&self, navigator: Arc<dyn Navigator>) -> JoinHandle<()> {
        let mut frames = self.subscribe();
        tokio::spawn(async move {
            loop {
                match frames.recv().await {
                    Ok(frame) => {
                        RedirectDispatcher::new(navigator.clone()).dispatch(&frame);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Redirect forwarder lagged behind the control channel");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Closes the channel with `1000`, cancels any pending reconnect and waits
    /// for the driver to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Control channel driver failed: {:?}", e);
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Driver {
    url: String,
    machine: ConnectionMachine,
    socket: Option<Socket>,
    handshake: Option<Handshake>,
    timer: Option<Pin<Box<Sleep>>>,
    /// Close code and reason of a close this side initiated.
    closing: Option<(u16, String)>,
    state: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
    frames: broadcast::Sender<ControlFrame>,
}

impl Driver {
    #[instrument(name = "control_channel", skip_all)]
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                result = until_open(&mut self.handshake) => {
                    self.handshake = None;
                    match result {
                        Ok(socket) => {
                            self.socket = Some(socket);
                            self.apply(ConnectionEvent::Opened).await;
                        }
                        Err(e) => {
                            self.apply(ConnectionEvent::TransportError(e.to_string())).await;
                            self.apply(ConnectionEvent::Closed {
                                code: ABNORMAL_CLOSURE,
                                reason: e.to_string(),
                            })
                            .await;
                        }
                    }
                },
                message = next_message(&mut self.socket) => self.on_message(message).await,
                () = until_due(&mut self.timer) => {
                    self.timer = None;
                    self.apply(ConnectionEvent::ReconnectElapsed).await;
                },
            }
        }

        self.apply(ConnectionEvent::Shutdown).await;
        info!("Control channel shut down");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.apply(ConnectionEvent::Connect).await,
            Command::Close { code, reason } => {
                self.apply(ConnectionEvent::CloseRequested { code, reason })
                    .await
            }
            Command::Send(text) => {
                let Some(socket) = self.socket.as_mut() else {
                    warn!("Dropping outbound control message; socket went away");
                    return;
                };
                if let Err(e) = socket.send(WsMessage::Text(text.into())).await {
                    // The read half reports the closure that follows.
                    self.apply(ConnectionEvent::TransportError(e.to_string()))
                        .await;
                }
            }
        }
    }

    async fn on_message(&mut self, message: Option<Result<WsMessage, tungstenite::Error>>) {
        match message {
            Some(Ok(WsMessage::Text(text))) => {
                if let Some(frame) = decode_inbound(text.as_str()) {
                    let _ = self.frames.send(frame);
                }
            }
            Some(Ok(WsMessage::Close(frame))) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.to_string()))
                    .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                self.on_closed(code, reason).await;
            }
            Some(Ok(other)) => trace!(?other, "Ignoring non-text control message"),
            Some(Err(e)) => {
                self.apply(ConnectionEvent::TransportError(e.to_string()))
                    .await;
                self.on_closed(ABNORMAL_CLOSURE, e.to_string()).await;
            }
            None => self.on_closed(ABNORMAL_CLOSURE, String::new()).await,
        }
    }

    async fn on_closed(&mut self, code: u16, reason: String) {
        self.socket = None;
        let (code, reason) = self.closing.take().unwrap_or((code, reason));
        self.apply(ConnectionEvent::Closed { code, reason }).await;
    }

    /// Feeds `event` to the machine and performs the resulting actions.
    async fn apply(&mut self, event: ConnectionEvent) {
        let mut next = Some(event);
        while let Some(event) = next.take() {
            let actions = self.machine.handle(event);
            self.publish();
            for action in actions {
                if let Some(follow_up) = self.perform(action).await {
                    next = Some(follow_up);
                }
            }
        }
    }

    fn publish(&self) {
        let current = self.machine.state();
        let changed = self.state.send_if_modified(|state| {
            if *state == current {
                return false;
            }
            debug!(from = %state, to = %current, "Control channel state changed");
            *state = current;
            true
        });
        if changed {
            let _ = self.transitions.send(current);
        }
    }

    async fn perform(&mut self, action: ConnectionAction) -> Option<ConnectionEvent> {
        match action {
            ConnectionAction::OpenSocket => {
                self.socket = None;
                self.closing = None;
                info!(url = %self.url, "Connecting control channel");
                let url = self.url.clone();
                self.handshake = Some(Box::pin(async move {
                    connect_async(url).await.map(|(socket, _)| socket)
                }));
                None
            }
            ConnectionAction::ScheduleReconnect(delay) => {
                self.timer = Some(Box::pin(tokio::time::sleep(delay)));
                None
            }
            ConnectionAction::CancelReconnect => {
                self.timer = None;
                None
            }
            ConnectionAction::CloseSocket { code, reason } => {
                if self.handshake.take().is_some() {
                    // Nothing to close yet; the attempt is simply abandoned.
                    return Some(ConnectionEvent::Closed { code, reason });
                }
                let socket = self.socket.as_mut()?;
                self.closing = Some((code, reason.clone()));
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                };
                if let Err(e) = socket.close(Some(frame)).await {
                    warn!(error = %e, "Failed to send close frame");
                    return Some(ConnectionEvent::TransportError(e.to_string()));
                }
                None
            }
        }
    }
}

async fn until_open(handshake: &mut Option<Handshake>) -> Result<Socket, tungstenite::Error> {
    match handshake {
        Some(handshake) => handshake.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_message(
    socket: &mut Option<Socket>,
) -> Option<Result<WsMessage, tungstenite::Error>> {
    match socket {
        Some(socket) => socket.next().await,
        None => std::future::pending().await,
    }
}

async fn until_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}
