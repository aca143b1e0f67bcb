//! Broadcast fields: small pieces of session state that one member edits
//! and everyone sees, last write wins.
//!
//! The lesson objective is typed live into a text box, so every keystroke
//! would otherwise become a broadcast. [`ObjectiveEditor`] coalesces edits
//! with a trailing debounce: each keystroke restarts the timer and only the
//! text still current when it fires is sent. There is no per-field
//! versioning; whichever edit reaches the server last is the one every
//! member (including this one, via the echoed broadcast) ends up showing.

use std::sync::Arc;
use std::time::Duration;

use protocol::{ClientMessage, SessionCode};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::connection::{ConnectionError, ConnectionManager};

pub const OBJECTIVE_DEBOUNCE: Duration = Duration::from_millis(500);

/// Edits the session objective, coalescing keystrokes into one broadcast.
#[derive(Clone)]
pub struct ObjectiveEditor {
    inner: Arc<Inner>,
}

struct Inner {
    connection: ConnectionManager,
    code: SessionCode,
    state: Mutex<EditState>,
}

struct EditState {
    latest: String,
    debounce: Option<JoinHandle<()>>,
}

impl ObjectiveEditor {
    #[must_use]
    pub fn new(connection: ConnectionManager, code: SessionCode) -> Self {
        Self {
            inner: Arc::new(Inner {
                connection,
                code,
                state: Mutex::new(EditState { latest: String::new(), debounce: None }),
            }),
        }
    }

    /// Record one edit of the objective text. The send fires once typing
    /// pauses; only the newest text goes out.
    pub async fn edit(&self, text: impl Into<String>) {
        let mut state = self.inner.state.lock().await;
        state.latest = text.into();
        if let Some(handle) = state.debounce.take() {
            handle.abort();
        }
        let inner = Arc::clone(&self.inner);
        state.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(OBJECTIVE_DEBOUNCE).await;
            let text = inner.state.lock().await.latest.clone();
            let _ = inner
                .connection
                .send(ClientMessage::SetObjective { code: inner.code.clone(), text })
                .await;
        }));
    }

    /// Send the current text right now, e.g. when the editor loses focus.
    ///
    /// # Errors
    ///
    /// Propagates [`ConnectionError`] when the socket is down.
    pub async fn flush(&self) -> Result<(), ConnectionError> {
        let text = {
            let mut state = self.inner.state.lock().await;
            if let Some(handle) = state.debounce.take() {
                handle.abort();
            }
            state.latest.clone()
        };
        self.inner
            .connection
            .send(ClientMessage::SetObjective { code: self.inner.code.clone(), text })
            .await
    }
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
