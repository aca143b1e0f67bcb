//! Session membership tracking.
//!
//! DESIGN
//! ======
//! The connection knows nothing about sessions; this module remembers which
//! session this client belongs to and keeps that membership true across
//! reconnects. Joining is idempotent per (connection, code): calling
//! [`SessionMembership::set_active_session`] twice with the same code sends
//! exactly one join message, and every fresh socket triggers exactly one
//! automatic rejoin of the recorded session.
//!
//! A rejected join clears the recorded session entirely. A dropped
//! connection only clears the "joined" flag, the code stays recorded so the
//! background task can replay the join as soon as the socket reopens. The
//! background task holds only a weak reference to the recorded session:
//! once every [`SessionMembership`] handle is gone, it stops rejoining and
//! exits on the next connection event.

use std::sync::{Arc, Weak};
use std::time::Duration;

use protocol::{ClientMessage, ServerMessage, SessionCode};
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};

use crate::connection::{ConnectionError, ConnectionManager, ConnectionStatus};

const JOIN_ACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("join rejected: {0}")]
    Rejected(String),
    #[error("no join acknowledgement within {JOIN_ACK_TIMEOUT:?}")]
    AckTimeout,
}

#[derive(Debug, Clone)]
struct ActiveSession {
    code: SessionCode,
    credentials: Option<String>,
    joined: bool,
}

/// Tracks the one session this client is a member of.
#[derive(Clone)]
pub struct SessionMembership {
    inner: Arc<Inner>,
}

struct Inner {
    connection: ConnectionManager,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionMembership {
    #[must_use]
    pub fn new(connection: ConnectionManager) -> Self {
        let inner = Arc::new(Inner { connection: connection.clone(), active: Mutex::new(None) });
        tokio::spawn(track_connection(connection, Arc::downgrade(&inner)));
        Self { inner }
    }

    /// Join `code`, replacing any previously active session.
    ///
    /// Repeating the call with the already-active code is a no-op: the
    /// server treats a repeated join as a state refresh, so this side never
    /// sends a second join for the same (connection, code) pair.
    ///
    /// # Errors
    ///
    /// [`MembershipError::Rejected`] if the server refuses the code,
    /// [`MembershipError::Connection`] if the socket is down (the code stays
    /// recorded and is joined automatically once the socket reopens), and
    /// [`MembershipError::AckTimeout`] if no acknowledgement arrives.
    pub async fn set_active_session(
        &self,
        code: SessionCode,
        credentials: Option<String>,
    ) -> Result<(), MembershipError> {
        {
            let mut active = self.inner.active.lock().await;
            if let Some(current) = active.as_ref() {
                if current.code == code {
                    return Ok(());
                }
            }
            *active = Some(ActiveSession { code: code.clone(), credentials: credentials.clone(), joined: false });
        }

        // Listen before sending so the acknowledgement cannot slip past.
        let mut inbound = self.inner.connection.subscribe();

        if let Err(e) = self
            .inner
            .connection
            .send(ClientMessage::JoinSession { code: code.clone(), credentials })
            .await
        {
            return Err(e.into());
        }

        let ack = tokio::time::timeout(JOIN_ACK_TIMEOUT, async {
            loop {
                match inbound.recv().await {
                    Ok(ServerMessage::SessionJoined { code: joined }) if joined == code => {
                        return Ok(());
                    }
                    Ok(ServerMessage::JoinRejected { code: rejected, reason })
                        if rejected == code =>
                    {
                        return Err(MembershipError::Rejected(reason));
                    }
                    Ok(_) => {}
                    // A lagged subscriber skips ahead; the ack may still
                    // be in the retained tail.
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(MembershipError::Connection(ConnectionError::Terminated));
                    }
                }
            }
        })
        .await
        .unwrap_or(Err(MembershipError::AckTimeout));

        match ack {
            Ok(()) => {
                let mut active = self.inner.active.lock().await;
                if let Some(current) = active.as_mut() {
                    if current.code == code {
                        current.joined = true;
                    }
                }
                Ok(())
            }
            Err(e) => {
                if matches!(e, MembershipError::Rejected(_)) {
                    let mut active = self.inner.active.lock().await;
                    if active.as_ref().is_some_and(|a| a.code == code) {
                        *active = None;
                    }
                }
                Err(e)
            }
        }
    }

    /// Leave the active session, if any.
    pub async fn leave(&self) {
        let left = self.inner.active.lock().await.take();
        if let Some(session) = left {
            if session.joined {
                // Best effort: a dead socket has already left for us.
                let _ = self
                    .inner
                    .connection
                    .send(ClientMessage::LeaveSession { code: session.code })
                    .await;
            }
        }
    }

    /// The session this client is (or wants to be) a member of.
    pub async fn active_session(&self) -> Option<SessionCode> {
        self.inner.active.lock().await.as_ref().map(|a| a.code.clone())
    }

    /// Whether the active session's join has been acknowledged on the
    /// current socket.
    pub async fn is_joined(&self) -> bool {
        self.inner.active.lock().await.as_ref().is_some_and(|a| a.joined)
    }
}

/// Follow connection liveness: replay the join on every fresh socket, and
/// mark membership stale whenever the socket drops.
///
/// Holds only a weak reference so an abandoned membership does not keep
/// rejoining forever; the task exits once every handle is gone.
async fn track_connection(connection: ConnectionManager, inner: Weak<Inner>) {
    let mut status = connection.watch_status();
    let mut inbound = connection.subscribe();

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    return;
                }
                // Copy the status out so no watch guard lives across an
                // await point.
                let current = *status.borrow_and_update();
                let Some(inner) = inner.upgrade() else { return };
                match current {
                    ConnectionStatus::Open => rejoin_if_needed(&inner).await,
                    ConnectionStatus::Closed | ConnectionStatus::Failed => {
                        let mut active = inner.active.lock().await;
                        if let Some(session) = active.as_mut() {
                            session.joined = false;
                        }
                    }
                    ConnectionStatus::Connecting => {}
                }
            }
            message = inbound.recv() => {
                match message {
                    Ok(ServerMessage::SessionJoined { code }) => {
                        let Some(inner) = inner.upgrade() else { return };
                        let mut active = inner.active.lock().await;
                        if let Some(session) = active.as_mut() {
                            if session.code == code {
                                session.joined = true;
                            }
                        }
                    }
                    Ok(ServerMessage::JoinRejected { code, reason }) => {
                        let Some(inner) = inner.upgrade() else { return };
                        let mut active = inner.active.lock().await;
                        if active.as_ref().is_some_and(|a| a.code == code) {
                            warn!(%code, %reason, "membership: join rejected, clearing session");
                            *active = None;
                        }
                    }
                    Ok(_) => {}
                    // Lagged is recoverable, a closed channel means the
                    // connection task is gone.
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}

async fn rejoin_if_needed(inner: &Arc<Inner>) {
    let pending = {
        let active = inner.active.lock().await;
        active.as_ref().filter(|a| !a.joined).cloned()
    };
    if let Some(session) = pending {
        info!(code = %session.code, "membership: rejoining after reconnect");
        let _ = inner
            .connection
            .send(ClientMessage::JoinSession {
                code: session.code,
                credentials: session.credentials,
            })
            .await;
    }
}

#[cfg(test)]
#[path = "membership_test.rs"]
mod tests;
