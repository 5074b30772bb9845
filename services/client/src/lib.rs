//! FinBuddy Client Library Crate
//!
//! This library contains the I/O side of the assistant client: configuration,
//! the per-visit context, the control-channel WebSocket, the streamed chat
//! exchange and the voice session driver. The `finbuddy` binary is a thin
//! terminal front end around this library.

pub mod chat;
pub mod config;
pub mod navigation;
pub mod state;
pub mod voice;
pub mod ws;
