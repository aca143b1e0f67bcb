//! Shared wire vocabulary for the classlink realtime protocol.
//!
//! This crate owns everything that crosses the websocket between the
//! classroom server and its clients: the session-code type, the timer
//! snapshot shape, caption fragments, and the closed message enums.
//!
//! DESIGN
//! ======
//! Messages are serde-tagged enums rather than stringly-typed event names.
//! Every kind has a fixed payload shape, so an unknown or malformed message
//! fails at the decode boundary instead of deep inside a handler. Frames
//! travel as JSON text messages.

pub mod code;
pub mod message;

pub use code::{CodeError, SessionCode};
pub use message::{
    CaptionFragment, ClientMessage, DecodeError, ServerMessage, TimerSnapshot,
};
