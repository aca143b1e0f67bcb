use async_trait::async_trait;
use std::sync::Arc;

use super::*;
use crate::services::translate::{Translate, TranslateError};
use crate::state::test_helpers::{seed_session, test_app_state, test_app_state_with_translator};
use crate::state::AppState;

struct EchoTranslator;

#[async_trait]
impl Translate for EchoTranslator {
    async fn translate(
        &self,
        text: &str,
        _source_language: &str,
        target_language: &str,
    ) -> Result<String, TranslateError> {
        Ok(format!("{target_language}:{text}"))
    }
}

struct FailingTranslator;

#[async_trait]
impl Translate for FailingTranslator {
    async fn translate(&self, _: &str, _: &str, _: &str) -> Result<String, TranslateError> {
        Err(TranslateError::Backend("quota exceeded".into()))
    }
}

/// One simulated websocket client: its session slot, id, and member channel.
struct TestClient {
    session: Option<SessionCode>,
    id: Uuid,
    tx: mpsc::Sender<ServerMessage>,
    rx: mpsc::Receiver<ServerMessage>,
}

impl TestClient {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(32);
        Self { session: None, id: Uuid::new_v4(), tx, rx }
    }

    async fn send(&mut self, state: &AppState, message: &ClientMessage) -> Vec<ServerMessage> {
        process_message(state, &mut self.session, self.id, &self.tx, &message.encode()).await
    }
}

fn code() -> SessionCode {
    SessionCode::parse("AB12CD").expect("valid")
}

fn join(credentials: Option<&str>) -> ClientMessage {
    ClientMessage::JoinSession { code: code(), credentials: credentials.map(str::to_owned) }
}

async fn joined_controller(state: &AppState) -> TestClient {
    let mut client = TestClient::new();
    let replies = client.send(state, &join(Some("controller-token"))).await;
    assert_eq!(replies[0], ServerMessage::SessionJoined { code: code() });
    client
}

async fn joined_member(state: &AppState) -> TestClient {
    let mut client = TestClient::new();
    let replies = client.send(state, &join(None)).await;
    assert_eq!(replies[0], ServerMessage::SessionJoined { code: code() });
    client
}

// =============================================================================
// DECODE / JOIN
// =============================================================================

#[tokio::test]
async fn malformed_frame_gets_error_reply() {
    let state = test_app_state();
    let mut client = TestClient::new();
    let replies =
        process_message(&state, &mut client.session, client.id, &client.tx, "{not json").await;
    assert!(matches!(&replies[..], [ServerMessage::Error { .. }]));
}

#[tokio::test]
async fn join_unknown_code_is_rejected() {
    let state = test_app_state();
    let mut client = TestClient::new();
    let replies = client.send(&state, &join(None)).await;
    assert!(
        matches!(&replies[..], [ServerMessage::JoinRejected { code: c, .. }] if *c == code())
    );
    assert!(client.session.is_none());
}

#[tokio::test]
async fn join_acks_and_registers_member() {
    let state = test_app_state();
    seed_session(&state, "AB12CD").await;
    let client = joined_member(&state).await;
    assert_eq!(client.session, Some(code()));

    let sessions = state.sessions.read().await;
    assert_eq!(sessions.get(&code()).expect("session").members.len(), 1);
}

#[tokio::test]
async fn repeat_join_is_idempotent_re_ack() {
    let state = test_app_state();
    seed_session(&state, "AB12CD").await;
    let mut client = joined_member(&state).await;

    let replies = client.send(&state, &join(None)).await;
    assert_eq!(replies, vec![ServerMessage::SessionJoined { code: code() }]);

    let sessions = state.sessions.read().await;
    assert_eq!(sessions.get(&code()).expect("session").members.len(), 1);
}

#[tokio::test]
async fn join_replays_objective_to_late_joiner() {
    let state = test_app_state();
    seed_session(&state, "AB12CD").await;
    {
        let mut sessions = state.sessions.write().await;
        sessions.get_mut(&code()).expect("session").objective = "Understand recursion".into();
    }

    let mut client = TestClient::new();
    let replies = client.send(&state, &join(None)).await;
    assert_eq!(
        replies,
        vec![
            ServerMessage::SessionJoined { code: code() },
            ServerMessage::ObjectiveChanged { code: code(), text: "Understand recursion".into() },
        ]
    );
}

#[tokio::test]
async fn switching_sessions_leaves_the_old_room() {
    let state = test_app_state();
    seed_session(&state, "AB12CD").await;
    let other = seed_session(&state, "EF34GH").await;
    let mut client = joined_member(&state).await;

    let replies = client
        .send(&state, &ClientMessage::JoinSession { code: other.clone(), credentials: None })
        .await;
    assert_eq!(replies[0], ServerMessage::SessionJoined { code: other.clone() });

    let sessions = state.sessions.read().await;
    assert!(sessions.get(&code()).expect("old session").members.is_empty());
    assert_eq!(sessions.get(&other).expect("new session").members.len(), 1);
}

// =============================================================================
// TIMER
// =============================================================================

#[tokio::test]
async fn timer_command_from_member_is_refused() {
    let state = test_app_state();
    seed_session(&state, "AB12CD").await;
    let mut member = joined_member(&state).await;

    let replies = member
        .send(&state, &ClientMessage::TimerCommand { code: code(), running: true, remaining_seconds: 300 })
        .await;
    assert!(matches!(&replies[..], [ServerMessage::Error { .. }]));
}

#[tokio::test]
async fn timer_command_without_membership_is_refused() {
    let state = test_app_state();
    seed_session(&state, "AB12CD").await;
    let mut outsider = TestClient::new();

    let replies = outsider
        .send(&state, &ClientMessage::TimerCommand { code: code(), running: true, remaining_seconds: 300 })
        .await;
    assert!(matches!(&replies[..], [ServerMessage::Error { .. }]));
}

#[tokio::test]
async fn timer_start_broadcasts_to_every_member_including_controller() {
    let state = test_app_state();
    seed_session(&state, "AB12CD").await;
    let mut controller = joined_controller(&state).await;
    let mut member = joined_member(&state).await;

    let replies = controller
        .send(&state, &ClientMessage::TimerCommand { code: code(), running: true, remaining_seconds: 300 })
        .await;
    // Authoritative state comes back through the broadcast channel, not as
    // a direct reply.
    assert!(replies.is_empty());

    for rx in [&mut controller.rx, &mut member.rx] {
        let msg = rx.recv().await.expect("broadcast");
        let ServerMessage::TimerState { snapshot, .. } = msg else {
            panic!("expected timerState, got {msg:?}");
        };
        assert!(snapshot.running);
        assert_eq!(snapshot.remaining_seconds, 300);
    }
}

#[tokio::test]
async fn timer_zero_start_is_rejected_without_broadcast() {
    let state = test_app_state();
    seed_session(&state, "AB12CD").await;
    let mut controller = joined_controller(&state).await;

    let replies = controller
        .send(&state, &ClientMessage::TimerCommand { code: code(), running: true, remaining_seconds: 0 })
        .await;
    assert!(matches!(&replies[..], [ServerMessage::Error { .. }]));
    assert!(controller.rx.try_recv().is_err());
}

#[tokio::test]
async fn timer_reset_broadcasts_reset() {
    let state = test_app_state();
    seed_session(&state, "AB12CD").await;
    let mut controller = joined_controller(&state).await;
    let mut member = joined_member(&state).await;

    controller
        .send(&state, &ClientMessage::TimerCommand { code: code(), running: true, remaining_seconds: 60 })
        .await;
    controller.send(&state, &ClientMessage::TimerReset { code: code() }).await;

    // Skip the start broadcast, then expect the reset.
    let _ = member.rx.recv().await;
    assert_eq!(member.rx.recv().await.expect("reset"), ServerMessage::TimerReset { code: code() });

    let sessions = state.sessions.read().await;
    assert_eq!(
        sessions.get(&code()).expect("session").timer,
        crate::services::timer::TimerAuthority::Idle
    );
}

#[tokio::test]
async fn late_joiner_can_request_current_timer_state() {
    let state = test_app_state();
    seed_session(&state, "AB12CD").await;
    let mut controller = joined_controller(&state).await;
    controller
        .send(&state, &ClientMessage::TimerCommand { code: code(), running: true, remaining_seconds: 300 })
        .await;

    let mut late = joined_member(&state).await;
    let replies = late.send(&state, &ClientMessage::RequestTimerState { code: code() }).await;

    let [ServerMessage::TimerState { snapshot, .. }] = &replies[..] else {
        panic!("expected timerState reply, got {replies:?}");
    };
    assert!(snapshot.running);
    assert!(snapshot.remaining_seconds <= 300 && snapshot.remaining_seconds > 290);
}

// =============================================================================
// OBJECTIVE / CAPTIONS
// =============================================================================

#[tokio::test]
async fn set_objective_broadcasts_and_persists_for_replay() {
    let state = test_app_state();
    seed_session(&state, "AB12CD").await;
    let mut controller = joined_controller(&state).await;
    let mut member = joined_member(&state).await;

    controller
        .send(&state, &ClientMessage::SetObjective { code: code(), text: "Understand recursion".into() })
        .await;

    assert_eq!(
        member.rx.recv().await.expect("objective"),
        ServerMessage::ObjectiveChanged { code: code(), text: "Understand recursion".into() }
    );

    let sessions = state.sessions.read().await;
    assert_eq!(sessions.get(&code()).expect("session").objective, "Understand recursion");
}

#[tokio::test]
async fn caption_broadcast_excludes_the_producer() {
    let state = test_app_state();
    seed_session(&state, "AB12CD").await;
    let mut controller = joined_controller(&state).await;
    let mut member = joined_member(&state).await;

    let fragment = CaptionFragment {
        text: "so, recursion".into(),
        source_language: "en-US".into(),
        is_final: false,
        translations: std::collections::BTreeMap::new(),
    };
    controller
        .send(&state, &ClientMessage::Caption { code: code(), fragment: fragment.clone() })
        .await;

    assert_eq!(
        member.rx.recv().await.expect("caption"),
        ServerMessage::Caption { code: code(), fragment }
    );
    assert!(controller.rx.try_recv().is_err());
}

#[tokio::test]
async fn caption_from_member_is_refused() {
    let state = test_app_state();
    seed_session(&state, "AB12CD").await;
    let mut member = joined_member(&state).await;

    let fragment = CaptionFragment {
        text: "hi".into(),
        source_language: "en-US".into(),
        is_final: true,
        translations: std::collections::BTreeMap::new(),
    };
    let replies = member
        .send(&state, &ClientMessage::Caption { code: code(), fragment })
        .await;
    assert!(matches!(&replies[..], [ServerMessage::Error { .. }]));
}

// =============================================================================
// TRANSLATION
// =============================================================================

fn translation_request() -> ClientMessage {
    ClientMessage::RequestTranslation {
        text: "hello".into(),
        source_language: "en-US".into(),
        target_language: "es".into(),
    }
}

#[tokio::test]
async fn translation_without_backend_fails_soft() {
    let state = test_app_state();
    seed_session(&state, "AB12CD").await;
    let mut member = joined_member(&state).await;

    let replies = member.send(&state, &translation_request()).await;
    assert!(matches!(&replies[..], [ServerMessage::TranslationFailed { .. }]));
}

#[tokio::test]
async fn translation_result_arrives_on_member_channel() {
    let state = test_app_state_with_translator(Arc::new(EchoTranslator));
    seed_session(&state, "AB12CD").await;
    let mut member = joined_member(&state).await;

    let replies = member.send(&state, &translation_request()).await;
    assert!(replies.is_empty());

    assert_eq!(
        member.rx.recv().await.expect("translation"),
        ServerMessage::TranslationResult { text: "es:hello".into(), target_language: "es".into() }
    );
}

#[tokio::test]
async fn translation_backend_error_degrades_to_inline_failure() {
    let state = test_app_state_with_translator(Arc::new(FailingTranslator));
    seed_session(&state, "AB12CD").await;
    let mut member = joined_member(&state).await;

    member.send(&state, &translation_request()).await;

    let msg = member.rx.recv().await.expect("failure message");
    let ServerMessage::TranslationFailed { message } = msg else {
        panic!("expected translationFailed, got {msg:?}");
    };
    assert!(message.contains("quota exceeded"));
}
