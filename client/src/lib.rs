//! Client-side session synchronization for classlink.
//!
//! ARCHITECTURE
//! ============
//! One [`ConnectionManager`] per process owns the websocket; every other
//! module holds it as a capability and never reconstructs it. Layered on
//! top:
//! - [`SessionMembership`]: idempotent join tracking and automatic rejoin
//!   after every reconnect.
//! - [`CountdownDisplay`] / [`TimerController`]: seed-and-free-run timer
//!   reconciliation. Every authoritative server snapshot replaces the local
//!   projection, which then ticks on the local clock until the next one.
//! - [`CaptionConsumer`] / [`CaptionProducer`]: caption relay with
//!   debounced translation requests.
//! - [`ObjectiveEditor`]: debounced last-write-wins broadcast fields.
//! - [`SessionClient`]: facade wiring all of the above to one connection.

pub mod broadcast;
pub mod captions;
pub mod connection;
pub mod membership;
pub mod session;
pub mod timer;

pub use broadcast::ObjectiveEditor;
pub use captions::{CaptionConsumer, CaptionProducer, CaptionText};
pub use connection::{ConnectionConfig, ConnectionError, ConnectionManager, ConnectionStatus};
pub use membership::{MembershipError, SessionMembership};
pub use session::SessionClient;
pub use timer::{CountdownDisplay, PRESET_MINUTES, TimerController, TimerInputError, TimerReading};
