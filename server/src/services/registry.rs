//! Session registry — code issue and validation.
//!
//! DESIGN
//! ======
//! Codes are six random uppercase alphanumerics, short enough for a
//! student to type off a projector. Issuing a code creates the live
//! session immediately; whoever presents the accompanying controller
//! token on join becomes the session controller. Validation is a plain
//! existence check so the student UI can reject typos before opening a
//! websocket.

use std::fmt::Write;

use protocol::SessionCode;
use rand::Rng;
use tracing::info;

use crate::state::{AppState, SessionState};

const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Code plus the controller credential, returned to the teacher.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub code: SessionCode,
    pub controller_token: String,
}

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a random 32-byte hex controller token.
#[must_use]
pub fn generate_controller_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

fn generate_code() -> SessionCode {
    let mut rng = rand::rng();
    let raw: String = (0..protocol::code::CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..CODE_CHARSET.len());
            CODE_CHARSET[idx] as char
        })
        .collect();
    // The charset is a subset of what SessionCode accepts.
    SessionCode::parse(&raw).unwrap_or_else(|_| unreachable!("charset is valid"))
}

/// Issue a fresh session code and create its live session.
pub async fn issue_session(state: &AppState) -> IssuedSession {
    let mut sessions = state.sessions.write().await;
    let code = loop {
        let candidate = generate_code();
        if !sessions.contains_key(&candidate) {
            break candidate;
        }
    };
    let controller_token = generate_controller_token();
    sessions.insert(code.clone(), SessionState::new(controller_token.clone()));
    info!(%code, total = sessions.len(), "issued session code");
    IssuedSession { code, controller_token }
}

/// Check whether a code names a live session.
pub async fn validate(state: &AppState, code: &SessionCode) -> bool {
    state.sessions.read().await.contains_key(code)
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
