//! One object per joined session, wiring every feature to the shared
//! connection.
//!
//! SYSTEM CONTEXT
//! ==============
//! UI code holds a [`SessionClient`] and nothing else. Construction joins
//! the session (idempotently, via [`SessionMembership`]) and spawns a
//! router task that fans inbound server messages out to the right feature:
//! timer snapshots into the [`CountdownDisplay`], objective broadcasts into
//! a watch channel, captions and translation results into the
//! [`CaptionConsumer`]. Messages tagged with another session's code are
//! dropped at the door.
//!
//! A fresh timer snapshot is requested after every join acknowledgement,
//! including the automatic rejoin after a reconnect, so a client that was
//! offline during timer changes converges on the authoritative state.

use protocol::{ClientMessage, ServerMessage, SessionCode};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::broadcast::ObjectiveEditor;
use crate::captions::{CaptionConsumer, CaptionProducer};
use crate::connection::ConnectionManager;
use crate::membership::{MembershipError, SessionMembership};
use crate::timer::{CountdownDisplay, TimerController};

/// Everything one client does inside one session.
pub struct SessionClient {
    connection: ConnectionManager,
    membership: SessionMembership,
    code: SessionCode,
    countdown: CountdownDisplay,
    timer: TimerController,
    objective_editor: ObjectiveEditor,
    objective_tx: watch::Sender<String>,
    captions: CaptionConsumer,
    router: JoinHandle<()>,
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.router.abort();
    }
}

impl SessionClient {
    /// Join `code` and wire the session features up.
    ///
    /// # Errors
    ///
    /// Propagates [`MembershipError`] when the join is rejected, times out,
    /// or the socket is down.
    pub async fn join(
        connection: ConnectionManager,
        code: SessionCode,
        credentials: Option<String>,
    ) -> Result<Self, MembershipError> {
        let membership = SessionMembership::new(connection.clone());
        membership.set_active_session(code.clone(), credentials).await?;

        let countdown = CountdownDisplay::new();
        let timer = TimerController::new(connection.clone(), code.clone());
        let objective_editor = ObjectiveEditor::new(connection.clone(), code.clone());
        let (objective_tx, _) = watch::channel(String::new());
        let captions = CaptionConsumer::new(connection.clone());

        let router = tokio::spawn(route_inbound(
            connection.clone(),
            code.clone(),
            countdown.clone(),
            objective_tx.clone(),
            captions.clone(),
        ));

        // Seed the countdown; late joiners see the server's remainder, not
        // the configured duration.
        connection
            .send(ClientMessage::RequestTimerState { code: code.clone() })
            .await?;

        Ok(Self {
            connection,
            membership,
            code,
            countdown,
            timer,
            objective_editor,
            objective_tx,
            captions,
            router,
        })
    }

    #[must_use]
    pub fn code(&self) -> &SessionCode {
        &self.code
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// The locally ticking timer projection.
    #[must_use]
    pub fn countdown(&self) -> &CountdownDisplay {
        &self.countdown
    }

    /// Timer write side.
    #[must_use]
    pub fn timer(&self) -> &TimerController {
        &self.timer
    }

    /// Watch the session objective, last write wins.
    #[must_use]
    pub fn objective(&self) -> watch::Receiver<String> {
        self.objective_tx.subscribe()
    }

    /// Debounced objective write side.
    #[must_use]
    pub fn objective_editor(&self) -> &ObjectiveEditor {
        &self.objective_editor
    }

    /// Caption display and translation selection.
    #[must_use]
    pub fn captions(&self) -> &CaptionConsumer {
        &self.captions
    }

    /// A producer for publishing this client's own speech.
    #[must_use]
    pub fn caption_producer(&self, source_language: impl Into<String>) -> CaptionProducer {
        CaptionProducer::new(self.connection.clone(), self.code.clone(), source_language)
    }

    /// Leave the session. The connection stays up for the next join.
    pub async fn leave(self) {
        self.membership.leave().await;
    }
}

async fn route_inbound(
    connection: ConnectionManager,
    code: SessionCode,
    countdown: CountdownDisplay,
    objective_tx: watch::Sender<String>,
    captions: CaptionConsumer,
) {
    let mut inbound = connection.subscribe();
    loop {
        match inbound.recv().await {
            Ok(ServerMessage::TimerState { code: tagged, snapshot }) if tagged == code => {
                countdown.apply_snapshot(&snapshot);
            }
            Ok(ServerMessage::TimerReset { code: tagged }) if tagged == code => {
                countdown.apply_reset();
            }
            Ok(ServerMessage::ObjectiveChanged { code: tagged, text }) if tagged == code => {
                objective_tx.send_replace(text);
            }
            Ok(ServerMessage::Caption { code: tagged, fragment }) if tagged == code => {
                captions.handle_fragment(fragment).await;
            }
            Ok(ServerMessage::TranslationResult { text, target_language }) => {
                captions.handle_translation(text, &target_language).await;
            }
            Ok(ServerMessage::TranslationFailed { message }) => {
                captions.handle_translation_failure(message);
            }
            // Rejoin ack after a reconnect: the timer may have moved while
            // this client was offline, ask for a fresh snapshot.
            Ok(ServerMessage::SessionJoined { code: tagged }) if tagged == code => {
                let _ = connection
                    .send(ClientMessage::RequestTimerState { code: code.clone() })
                    .await;
            }
            Ok(ServerMessage::Error { message }) => {
                warn!(%message, "session: server error");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "session: inbound stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
