//! Session membership and fan-out.
//!
//! DESIGN
//! ======
//! One websocket client is at most one session member at a time; the ws
//! route tracks the current code and parts the old room before joining a
//! new one. Broadcast is best-effort per member: a full channel means a
//! slow consumer, and dropping one message beats stalling the room (the
//! protocol is last-write-wins, so the next update heals the gap).

use protocol::{ServerMessage, SessionCode};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("unknown session code: {0}")]
    UnknownSession(SessionCode),
}

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinAck {
    /// Whether the presented credentials granted controller rights.
    pub is_controller: bool,
    /// Current objective text, replayed to late joiners when non-empty.
    pub objective: Option<String>,
}

// =============================================================================
// JOIN / LEAVE
// =============================================================================

/// Join a session room.
///
/// Presenting the session's controller token as credentials grants
/// controller rights; anything else (or nothing) joins as a plain member.
///
/// # Errors
///
/// Returns [`RelayError::UnknownSession`] for a code the registry never
/// issued (or that did not survive a server restart).
pub async fn join_session(
    state: &AppState,
    code: &SessionCode,
    client_id: Uuid,
    credentials: Option<&str>,
    tx: mpsc::Sender<ServerMessage>,
) -> Result<JoinAck, RelayError> {
    let mut sessions = state.sessions.write().await;
    let Some(session) = sessions.get_mut(code) else {
        return Err(RelayError::UnknownSession(code.clone()));
    };

    session.members.insert(client_id, tx);

    let is_controller = credentials == Some(session.controller_token.as_str());
    if is_controller {
        session.controller = Some(client_id);
    }

    let objective =
        if session.objective.is_empty() { None } else { Some(session.objective.clone()) };

    info!(%code, %client_id, is_controller, members = session.members.len(), "client joined session");
    Ok(JoinAck { is_controller, objective })
}

/// Leave a session room. The session itself stays registered — its code
/// remains valid for rejoins until the process exits.
pub async fn leave_session(state: &AppState, code: &SessionCode, client_id: Uuid) {
    let mut sessions = state.sessions.write().await;
    let Some(session) = sessions.get_mut(code) else {
        return;
    };

    session.members.remove(&client_id);
    if session.controller == Some(client_id) {
        session.controller = None;
    }
    info!(%code, %client_id, remaining = session.members.len(), "client left session");
}

/// Whether this client currently holds controller rights for the session.
pub async fn is_controller(state: &AppState, code: &SessionCode, client_id: Uuid) -> bool {
    let sessions = state.sessions.read().await;
    sessions
        .get(code)
        .is_some_and(|session| session.controller == Some(client_id))
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Broadcast a message to all members of a session, optionally excluding one.
pub async fn broadcast(
    state: &AppState,
    code: &SessionCode,
    message: &ServerMessage,
    exclude: Option<Uuid>,
) {
    let sessions = state.sessions.read().await;
    let Some(session) = sessions.get(code) else {
        return;
    };

    for (client_id, tx) in &session.members {
        if exclude == Some(*client_id) {
            continue;
        }
        // Best-effort: if a client's channel is full, skip it.
        let _ = tx.try_send(message.clone());
    }
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
