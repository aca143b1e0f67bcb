//! WebSocket handler — bidirectional session relay.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID and enters a `select!` loop:
//! - Incoming client messages → decode + dispatch by variant
//! - Broadcast messages from session peers → forward to client
//!
//! Handler functions are pure business logic: they validate, mutate state,
//! and return an `Outcome`. The dispatch layer owns all outbound concerns:
//! reply to sender and broadcast to the room.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → client has no session
//! 2. `joinSession` → membership registered, objective replayed
//! 3. Controller commands → authoritative broadcasts to all members
//! 4. Close → leave session → cleanup

use std::time::Instant;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use protocol::{CaptionFragment, ClientMessage, ServerMessage, SessionCode, TimerSnapshot};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::relay;
use crate::services::timer::now_ms;
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what — handlers never send messages directly.
enum Outcome {
    /// Send one message to the sender only.
    Reply(ServerMessage),
    /// Send several messages to the sender only (join ack + replays).
    ReplyMany(Vec<ServerMessage>),
    /// Broadcast to ALL session members including the sender, who receives
    /// it through their member channel like everyone else.
    Broadcast {
        code: SessionCode,
        message: ServerMessage,
    },
    /// Broadcast to all members EXCLUDING the sender. Used for captions:
    /// the producer already has the text on screen.
    BroadcastExcludeSender {
        code: SessionCode,
        message: ServerMessage,
    },
    /// Nothing to send now (answer arrives later via the member channel).
    Silent,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();

    // Per-connection channel for receiving broadcast messages from peers
    // (and spawned translation replies).
    let (client_tx, mut client_rx) = mpsc::channel::<ServerMessage>(256);

    info!(%client_id, "ws: client connected");

    // Which session this connection has joined, if any.
    let mut current_session: Option<SessionCode> = None;

    'conn: loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_message(
                            &state,
                            &mut current_session,
                            client_id,
                            &client_tx,
                            text.as_str(),
                        )
                        .await;
                        for reply in replies {
                            if send_message(&mut socket, &reply).await.is_err() {
                                break 'conn;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(message) = client_rx.recv() => {
                if send_message(&mut socket, &message).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(code) = current_session {
        relay::leave_session(&state, &code, client_id).await;
    }
    info!(%client_id, "ws: client disconnected");
}

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    socket.send(Message::Text(message.encode().into())).await
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Decode and process one inbound text frame, returning messages for the
/// sender. Broadcasts to peers happen inside; separating transport from
/// dispatch lets tests exercise the whole protocol without a socket.
async fn process_message(
    state: &AppState,
    current_session: &mut Option<SessionCode>,
    client_id: Uuid,
    client_tx: &mpsc::Sender<ServerMessage>,
    text: &str,
) -> Vec<ServerMessage> {
    let message = match ClientMessage::decode(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound message");
            return vec![ServerMessage::Error { message: format!("malformed message: {e}") }];
        }
    };

    info!(%client_id, kind = message_kind(&message), "ws: recv message");

    let result = match message {
        ClientMessage::JoinSession { code, credentials } => {
            handle_join(state, current_session, client_id, client_tx, code, credentials).await
        }
        ClientMessage::LeaveSession { code } => {
            handle_leave(state, current_session, client_id, &code).await
        }
        ClientMessage::TimerCommand { code, running, remaining_seconds } => {
            handle_timer_command(state, current_session, client_id, code, running, remaining_seconds)
                .await
        }
        ClientMessage::TimerReset { code } => {
            handle_timer_reset(state, current_session, client_id, code).await
        }
        ClientMessage::RequestTimerState { code } => {
            handle_timer_request(state, current_session, code).await
        }
        ClientMessage::SetObjective { code, text } => {
            handle_set_objective(state, current_session, client_id, code, text).await
        }
        ClientMessage::Caption { code, fragment } => {
            handle_caption(state, current_session, client_id, code, fragment).await
        }
        ClientMessage::RequestTranslation { text, source_language, target_language } => {
            Ok(handle_translation(state, client_tx, text, source_language, target_language))
        }
    };

    // Apply outcome; the dispatch layer owns all outbound logic.
    match result {
        Ok(Outcome::Reply(message)) => vec![message],
        Ok(Outcome::ReplyMany(messages)) => messages,
        Ok(Outcome::Broadcast { code, message }) => {
            relay::broadcast(state, &code, &message, None).await;
            vec![]
        }
        Ok(Outcome::BroadcastExcludeSender { code, message }) => {
            relay::broadcast(state, &code, &message, Some(client_id)).await;
            vec![]
        }
        Ok(Outcome::Silent) => vec![],
        Err(error_message) => vec![error_message],
    }
}

fn message_kind(message: &ClientMessage) -> &'static str {
    match message {
        ClientMessage::JoinSession { .. } => "joinSession",
        ClientMessage::LeaveSession { .. } => "leaveSession",
        ClientMessage::TimerCommand { .. } => "timerCommand",
        ClientMessage::TimerReset { .. } => "timerReset",
        ClientMessage::RequestTimerState { .. } => "requestTimerState",
        ClientMessage::SetObjective { .. } => "setObjective",
        ClientMessage::Caption { .. } => "caption",
        ClientMessage::RequestTranslation { .. } => "requestTranslation",
    }
}

// =============================================================================
// GUARDS
// =============================================================================

fn not_a_member(code: &SessionCode) -> ServerMessage {
    ServerMessage::Error { message: format!("not a member of session {code}") }
}

/// Mutating commands require current membership AND controller rights.
async fn require_controller(
    state: &AppState,
    current_session: &Option<SessionCode>,
    client_id: Uuid,
    code: &SessionCode,
) -> Result<(), ServerMessage> {
    if current_session.as_ref() != Some(code) {
        return Err(not_a_member(code));
    }
    if !relay::is_controller(state, code, client_id).await {
        return Err(ServerMessage::Error {
            message: "only the session controller may do that".into(),
        });
    }
    Ok(())
}

// =============================================================================
// MEMBERSHIP HANDLERS
// =============================================================================

async fn handle_join(
    state: &AppState,
    current_session: &mut Option<SessionCode>,
    client_id: Uuid,
    client_tx: &mpsc::Sender<ServerMessage>,
    code: SessionCode,
    credentials: Option<String>,
) -> Result<Outcome, ServerMessage> {
    // Repeat join for the session we are already in: re-ack, no side effects.
    if current_session.as_ref() == Some(&code) {
        return Ok(Outcome::Reply(ServerMessage::SessionJoined { code }));
    }

    // Switching sessions: leave the old room first.
    if let Some(old) = current_session.take() {
        relay::leave_session(state, &old, client_id).await;
    }

    match relay::join_session(state, &code, client_id, credentials.as_deref(), client_tx.clone())
        .await
    {
        Ok(ack) => {
            *current_session = Some(code.clone());
            let mut replies = vec![ServerMessage::SessionJoined { code: code.clone() }];
            if let Some(text) = ack.objective {
                replies.push(ServerMessage::ObjectiveChanged { code, text });
            }
            Ok(Outcome::ReplyMany(replies))
        }
        Err(e) => Err(ServerMessage::JoinRejected { code, reason: e.to_string() }),
    }
}

async fn handle_leave(
    state: &AppState,
    current_session: &mut Option<SessionCode>,
    client_id: Uuid,
    code: &SessionCode,
) -> Result<Outcome, ServerMessage> {
    if current_session.as_ref() == Some(code) {
        relay::leave_session(state, code, client_id).await;
        *current_session = None;
    }
    Ok(Outcome::Silent)
}

// =============================================================================
// TIMER HANDLERS
// =============================================================================

async fn handle_timer_command(
    state: &AppState,
    current_session: &Option<SessionCode>,
    client_id: Uuid,
    code: SessionCode,
    running: bool,
    remaining_seconds: u64,
) -> Result<Outcome, ServerMessage> {
    require_controller(state, current_session, client_id, &code).await?;

    let mut sessions = state.sessions.write().await;
    let Some(session) = sessions.get_mut(&code) else {
        return Err(not_a_member(&code));
    };
    let (running, remaining_seconds) = session
        .timer
        .apply_command(running, remaining_seconds, Instant::now())
        .map_err(|e| ServerMessage::Error { message: e.to_string() })?;
    drop(sessions);

    let snapshot = TimerSnapshot { running, remaining_seconds, server_timestamp_ms: now_ms() };
    Ok(Outcome::Broadcast {
        code: code.clone(),
        message: ServerMessage::TimerState { code, snapshot },
    })
}

async fn handle_timer_reset(
    state: &AppState,
    current_session: &Option<SessionCode>,
    client_id: Uuid,
    code: SessionCode,
) -> Result<Outcome, ServerMessage> {
    require_controller(state, current_session, client_id, &code).await?;

    let mut sessions = state.sessions.write().await;
    if let Some(session) = sessions.get_mut(&code) {
        session.timer.reset();
    }
    drop(sessions);

    Ok(Outcome::Broadcast { code: code.clone(), message: ServerMessage::TimerReset { code } })
}

async fn handle_timer_request(
    state: &AppState,
    current_session: &Option<SessionCode>,
    code: SessionCode,
) -> Result<Outcome, ServerMessage> {
    if current_session.as_ref() != Some(&code) {
        return Err(not_a_member(&code));
    }

    let mut sessions = state.sessions.write().await;
    let Some(session) = sessions.get_mut(&code) else {
        return Err(not_a_member(&code));
    };
    // Computed at reply time so late joiners never see stale remaining time.
    let snapshot = session.timer.snapshot(Instant::now());
    drop(sessions);

    Ok(Outcome::Reply(ServerMessage::TimerState { code, snapshot }))
}

// =============================================================================
// BROADCAST-FIELD / CAPTION HANDLERS
// =============================================================================

async fn handle_set_objective(
    state: &AppState,
    current_session: &Option<SessionCode>,
    client_id: Uuid,
    code: SessionCode,
    text: String,
) -> Result<Outcome, ServerMessage> {
    require_controller(state, current_session, client_id, &code).await?;

    let mut sessions = state.sessions.write().await;
    if let Some(session) = sessions.get_mut(&code) {
        session.objective = text.clone();
    }
    drop(sessions);

    Ok(Outcome::Broadcast {
        code: code.clone(),
        message: ServerMessage::ObjectiveChanged { code, text },
    })
}

async fn handle_caption(
    state: &AppState,
    current_session: &Option<SessionCode>,
    client_id: Uuid,
    code: SessionCode,
    fragment: CaptionFragment,
) -> Result<Outcome, ServerMessage> {
    require_controller(state, current_session, client_id, &code).await?;

    Ok(Outcome::BroadcastExcludeSender {
        code: code.clone(),
        message: ServerMessage::Caption { code, fragment },
    })
}

/// Translation requests are answered out-of-band: the backend round-trip is
/// spawned so a slow translator never stalls the relay loop, and the reply
/// arrives through the member channel.
fn handle_translation(
    state: &AppState,
    client_tx: &mpsc::Sender<ServerMessage>,
    text: String,
    source_language: String,
    target_language: String,
) -> Outcome {
    let Some(translator) = state.translator.clone() else {
        return Outcome::Reply(ServerMessage::TranslationFailed {
            message: "translation backend not configured".into(),
        });
    };

    let reply_tx = client_tx.clone();
    tokio::spawn(async move {
        let reply = match translator.translate(&text, &source_language, &target_language).await {
            Ok(translated) => ServerMessage::TranslationResult {
                text: translated,
                target_language,
            },
            Err(e) => {
                warn!(error = %e, "translation request failed");
                ServerMessage::TranslationFailed { message: e.to_string() }
            }
        };
        let _ = reply_tx.send(reply).await;
    });

    Outcome::Silent
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
