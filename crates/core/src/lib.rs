//! FinBuddy Client Core
//!
//! Transport-free building blocks of the assistant client: the `data:` frame
//! parser, redirect dispatch, the conversation log, and the pure state
//! machines behind the control channel and the voice session. The seams to
//! the outside world (voice credentials, the audio room service, navigation)
//! are traits so that drivers and tests can plug in their own.

pub mod chat;
pub mod connection;
pub mod credentials;
pub mod dispatch;
pub mod frame;
pub mod identity;
pub mod message;
pub mod parser;
pub mod room;
pub mod voice;

pub use dispatch::{Dispatch, Navigator, RedirectDispatcher};
pub use frame::ControlFrame;
pub use parser::StreamFrameParser;
