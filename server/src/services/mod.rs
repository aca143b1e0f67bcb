//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own session bookkeeping and timer/translation logic so
//! route handlers can stay focused on protocol translation and dispatch.

pub mod registry;
pub mod relay;
pub mod timer;
pub mod translate;
