//! External Audio Room Capability
//!
//! The voice session hands a token and server URL to a real-time room service
//! and gets back a handle for microphone control and disconnection, plus a
//! stream of room events. The media transport itself lives behind these
//! traits.

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

/// Everything needed to join one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConfig {
    pub server_url: String,
    pub token: String,
    pub room_name: String,
    pub microphone_enabled: bool,
}

/// Events a joined room reports back to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// A data-channel message from another participant (usually the agent).
    Data(Vec<u8>),
    /// The room connection dropped or was closed by the service.
    Disconnected { reason: Option<String> },
    /// The room connection failed.
    Error(String),
}

/// The stream of events of one joined room. It ends when the room is left.
pub type RoomEvents = Pin<Box<dyn Stream<Item = RoomEvent> + Send>>;

/// Controls one joined room.
#[async_trait]
pub trait RoomHandle: Send + Sync {
    async fn set_microphone_enabled(&self, enabled: bool) -> Result<()>;

    /// Leaves the room and releases its audio resources.
    async fn disconnect(&self) -> Result<()>;
}

/// Joins rooms of the external real-time audio service.
#[async_trait]
pub trait RoomConnector: Send + Sync {
    async fn join(&self, config: RoomConfig) -> Result<(Box<dyn RoomHandle>, RoomEvents)>;
}

/// A `RoomConnector` that completes the join handshake without any media.
///
/// Useful for development against a backend without a room service, and for
/// exercising the voice lifecycle end to end. Data messages can be injected
/// through [`LoopbackRoomConnector::injector`].
#[derive(Default, Clone)]
pub struct LoopbackRoomConnector {
    current: Arc<std::sync::Mutex<Option<mpsc::WeakSender<RoomEvent>>>>,
}

impl LoopbackRoomConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sender into the event stream of the currently joined room, if any.
    pub fn injector(&self) -> Option<mpsc::Sender<RoomEvent>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .and_then(mpsc::WeakSender::upgrade)
    }
}

struct LoopbackRoom {
    room_name: String,
    events: std::sync::Mutex<Option<mpsc::Sender<RoomEvent>>>,
}

#[async_trait]
impl RoomHandle for LoopbackRoom {
    async fn set_microphone_enabled(&self, enabled: bool) -> Result<()> {
        info!(room_name = %self.room_name, enabled, "Loopback room microphone toggled");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        info!(room_name = %self.room_name, "Leaving loopback room");
        // Dropping the sender ends the event stream.
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        Ok(())
    }
}

#[async_trait]
impl RoomConnector for LoopbackRoomConnector {
    async fn join(&self, config: RoomConfig) -> Result<(Box<dyn RoomHandle>, RoomEvents)> {
        info!(
            server_url = %config.server_url,
            room_name = %config.room_name,
            microphone_enabled = config.microphone_enabled,
            "Joined loopback room"
        );
        let (tx, rx) = mpsc::channel(32);
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tx.downgrade());
        let handle = LoopbackRoom {
            room_name: config.room_name,
            events: std::sync::Mutex::new(Some(tx)),
        };
        Ok((Box::new(handle), Box::pin(ReceiverStream::new(rx))))
    }
}
