//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the live session map and the optional translation backend.
//! Each session is a room: connected members keyed by client ID, the
//! current broadcast fields, and the authoritative timer. Everything is
//! in-memory; nothing outlives the process (session persistence is an
//! explicit non-goal).

use std::collections::HashMap;
use std::sync::Arc;

use protocol::{ServerMessage, SessionCode};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::services::timer::TimerAuthority;
use crate::services::translate::Translate;

// =============================================================================
// SESSION STATE
// =============================================================================

/// Per-session live state. Created when a teacher requests a code and kept
/// until the process exits; an empty member set does not invalidate the
/// code (students may join before the teacher, or everyone may drop and
/// reconnect).
pub struct SessionState {
    /// Opaque credential returned to whoever generated the code. Presenting
    /// it on join grants controller rights for this session.
    pub controller_token: String,
    /// Client currently holding controller rights, if connected.
    pub controller: Option<Uuid>,
    /// Connected members: `client_id` -> sender for outgoing messages.
    pub members: HashMap<Uuid, mpsc::Sender<ServerMessage>>,
    /// Current objective text (last write wins). Replayed to late joiners.
    pub objective: String,
    /// Authoritative countdown state.
    pub timer: TimerAuthority,
}

impl SessionState {
    #[must_use]
    pub fn new(controller_token: String) -> Self {
        Self {
            controller_token,
            controller: None,
            members: HashMap::new(),
            objective: String::new(),
            timer: TimerAuthority::Idle,
        }
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum — all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<RwLock<HashMap<SessionCode, SessionState>>>,
    /// Optional translation backend. `None` if translation env vars are not
    /// configured; caption relay still works, translation requests fail soft.
    pub translator: Option<Arc<dyn Translate>>,
}

impl AppState {
    #[must_use]
    pub fn new(translator: Option<Arc<dyn Translate>>) -> Self {
        Self { sessions: Arc::new(RwLock::new(HashMap::new())), translator }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
