use std::time::Duration;

use protocol::{ClientMessage, ServerMessage, SessionCode};
use tokio::sync::mpsc::error::TryRecvError;

use super::*;
use crate::connection::test_support::stub;

fn code(s: &str) -> SessionCode {
    SessionCode::parse(s).expect("valid code")
}

async fn settle() {
    // Let background tasks drain their channels.
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn join_sends_one_message_and_resolves_on_ack() {
    let mut stub = stub();
    let membership = SessionMembership::new(stub.manager.clone());

    let join = {
        let membership = membership.clone();
        tokio::spawn(async move { membership.set_active_session(code("AB12CD"), None).await })
    };

    let sent = stub.sent.recv().await.expect("join sent");
    assert_eq!(sent, ClientMessage::JoinSession { code: code("AB12CD"), credentials: None });

    stub.inbound
        .send(ServerMessage::SessionJoined { code: code("AB12CD") })
        .expect("subscribers");
    join.await.expect("task").expect("join ok");
    assert!(membership.is_joined().await);
}

#[tokio::test(start_paused = true)]
async fn repeated_join_for_same_code_is_idempotent() {
    let mut stub = stub();
    let membership = SessionMembership::new(stub.manager.clone());

    let join = {
        let membership = membership.clone();
        tokio::spawn(async move { membership.set_active_session(code("AB12CD"), None).await })
    };
    stub.sent.recv().await.expect("join sent");
    stub.inbound
        .send(ServerMessage::SessionJoined { code: code("AB12CD") })
        .expect("subscribers");
    join.await.expect("task").expect("join ok");

    // Same code again: no second join message leaves this client.
    membership
        .set_active_session(code("AB12CD"), None)
        .await
        .expect("idempotent");
    settle().await;
    assert!(matches!(stub.sent.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn rejected_join_clears_the_active_session() {
    let mut stub = stub();
    let membership = SessionMembership::new(stub.manager.clone());

    let join = {
        let membership = membership.clone();
        tokio::spawn(async move { membership.set_active_session(code("ZZ99ZZ"), None).await })
    };
    stub.sent.recv().await.expect("join sent");
    stub.inbound
        .send(ServerMessage::JoinRejected {
            code: code("ZZ99ZZ"),
            reason: "unknown session".into(),
        })
        .expect("subscribers");

    let err = join.await.expect("task").expect_err("rejected");
    assert!(matches!(err, MembershipError::Rejected(_)));
    settle().await;
    assert_eq!(membership.active_session().await, None);
}

#[tokio::test(start_paused = true)]
async fn join_while_down_is_replayed_when_the_socket_opens() {
    let mut stub = stub();
    let membership = SessionMembership::new(stub.manager.clone());

    stub.status.send(ConnectionStatus::Closed).expect("watchers");
    settle().await;

    let err = membership
        .set_active_session(code("AB12CD"), Some("tok".into()))
        .await
        .expect_err("socket down");
    assert!(matches!(err, MembershipError::Connection(ConnectionError::NotConnected)));
    assert_eq!(membership.active_session().await, Some(code("AB12CD")));

    // The recorded session is joined automatically on the next open socket.
    stub.status.send(ConnectionStatus::Open).expect("watchers");
    let sent = stub.sent.recv().await.expect("replayed join");
    assert_eq!(
        sent,
        ClientMessage::JoinSession { code: code("AB12CD"), credentials: Some("tok".into()) }
    );

    stub.inbound
        .send(ServerMessage::SessionJoined { code: code("AB12CD") })
        .expect("subscribers");
    settle().await;
    assert!(membership.is_joined().await);
}

#[tokio::test(start_paused = true)]
async fn reconnect_triggers_exactly_one_rejoin() {
    let mut stub = stub();
    let membership = SessionMembership::new(stub.manager.clone());

    let join = {
        let membership = membership.clone();
        tokio::spawn(async move { membership.set_active_session(code("AB12CD"), None).await })
    };
    stub.sent.recv().await.expect("join sent");
    stub.inbound
        .send(ServerMessage::SessionJoined { code: code("AB12CD") })
        .expect("subscribers");
    join.await.expect("task").expect("join ok");

    stub.status.send(ConnectionStatus::Closed).expect("watchers");
    settle().await;
    assert!(!membership.is_joined().await);

    stub.status.send(ConnectionStatus::Open).expect("watchers");
    let sent = stub.sent.recv().await.expect("rejoin");
    assert_eq!(sent, ClientMessage::JoinSession { code: code("AB12CD"), credentials: None });
    settle().await;
    assert!(matches!(stub.sent.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn reconnect_without_an_active_session_sends_nothing() {
    let mut stub = stub();
    let _membership = SessionMembership::new(stub.manager.clone());

    stub.status.send(ConnectionStatus::Closed).expect("watchers");
    stub.status.send(ConnectionStatus::Open).expect("watchers");
    settle().await;
    assert!(matches!(stub.sent.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn switching_sessions_joins_the_new_code() {
    let mut stub = stub();
    let membership = SessionMembership::new(stub.manager.clone());

    let join = {
        let membership = membership.clone();
        tokio::spawn(async move { membership.set_active_session(code("AB12CD"), None).await })
    };
    stub.sent.recv().await.expect("first join");
    stub.inbound
        .send(ServerMessage::SessionJoined { code: code("AB12CD") })
        .expect("subscribers");
    join.await.expect("task").expect("join ok");

    let join = {
        let membership = membership.clone();
        tokio::spawn(async move { membership.set_active_session(code("XY34ZT"), None).await })
    };
    let sent = stub.sent.recv().await.expect("second join");
    assert_eq!(sent, ClientMessage::JoinSession { code: code("XY34ZT"), credentials: None });
    stub.inbound
        .send(ServerMessage::SessionJoined { code: code("XY34ZT") })
        .expect("subscribers");
    join.await.expect("task").expect("join ok");
    assert_eq!(membership.active_session().await, Some(code("XY34ZT")));
}

#[tokio::test(start_paused = true)]
async fn dropped_membership_stops_rejoining() {
    let mut stub = stub();
    let membership = SessionMembership::new(stub.manager.clone());

    let join = {
        let membership = membership.clone();
        tokio::spawn(async move { membership.set_active_session(code("AB12CD"), None).await })
    };
    stub.sent.recv().await.expect("join sent");
    stub.inbound
        .send(ServerMessage::SessionJoined { code: code("AB12CD") })
        .expect("subscribers");
    join.await.expect("task").expect("join ok");

    // An abandoned handle abandons the session: the background task must
    // not keep replaying the join on every fresh socket.
    drop(membership);
    stub.status.send(ConnectionStatus::Closed).expect("watchers");
    settle().await;
    stub.status.send(ConnectionStatus::Open).expect("watchers");
    settle().await;
    assert!(matches!(stub.sent.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn join_ack_survives_a_lagged_inbound_feed() {
    let mut stub = stub();
    let membership = SessionMembership::new(stub.manager.clone());

    let join = {
        let membership = membership.clone();
        tokio::spawn(async move { membership.set_active_session(code("AB12CD"), None).await })
    };
    stub.sent.recv().await.expect("join sent");

    // Flood past the inbound buffer while the ack waiter is parked, then
    // deliver the ack. The waiter sees a lag, skips ahead, and still finds
    // its acknowledgement.
    for n in 0..300 {
        stub.inbound
            .send(ServerMessage::ObjectiveChanged {
                code: code("XY34ZT"),
                text: format!("update {n}"),
            })
            .expect("subscribers");
    }
    stub.inbound
        .send(ServerMessage::SessionJoined { code: code("AB12CD") })
        .expect("subscribers");

    join.await.expect("task").expect("join ok despite lag");
    assert!(membership.is_joined().await);
}

#[tokio::test(start_paused = true)]
async fn leave_sends_leave_and_clears_state() {
    let mut stub = stub();
    let membership = SessionMembership::new(stub.manager.clone());

    let join = {
        let membership = membership.clone();
        tokio::spawn(async move { membership.set_active_session(code("AB12CD"), None).await })
    };
    stub.sent.recv().await.expect("join sent");
    stub.inbound
        .send(ServerMessage::SessionJoined { code: code("AB12CD") })
        .expect("subscribers");
    join.await.expect("task").expect("join ok");

    membership.leave().await;
    let sent = stub.sent.recv().await.expect("leave sent");
    assert_eq!(sent, ClientMessage::LeaveSession { code: code("AB12CD") });
    assert_eq!(membership.active_session().await, None);
}
