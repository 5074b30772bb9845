//! The control channel: a long-lived WebSocket to `/agent/ws/{user_id}` over
//! which the backend pushes redirect signals and heartbeats.

pub mod connection;
pub mod protocol;

pub use connection::{ConnectionError, ConnectionManager};
