use std::time::Duration;

use protocol::{ClientMessage, SessionCode, TimerSnapshot};
use tokio::sync::mpsc::error::TryRecvError;

use super::*;
use crate::connection::test_support::stub;

fn code() -> SessionCode {
    SessionCode::parse("AB12CD").expect("valid code")
}

fn snapshot(running: bool, remaining_seconds: u64) -> TimerSnapshot {
    TimerSnapshot { running, remaining_seconds, server_timestamp_ms: 1_700_000_000_000 }
}

async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}

// =============================================================================
// COUNTDOWN DISPLAY
// =============================================================================

#[tokio::test(start_paused = true)]
async fn running_snapshot_ticks_down_locally() {
    let display = CountdownDisplay::new();
    display.apply_snapshot(&snapshot(true, 300));
    assert_eq!(display.reading(), TimerReading { running: true, remaining_seconds: 300 });

    advance(Duration::from_millis(1100)).await;
    assert_eq!(display.reading(), TimerReading { running: true, remaining_seconds: 299 });

    advance(Duration::from_millis(1000)).await;
    assert_eq!(display.reading(), TimerReading { running: true, remaining_seconds: 298 });
}

#[tokio::test(start_paused = true)]
async fn every_snapshot_replaces_the_projection() {
    let display = CountdownDisplay::new();
    display.apply_snapshot(&snapshot(true, 300));
    advance(Duration::from_millis(3100)).await;
    assert_eq!(display.reading().remaining_seconds, 297);

    // A later snapshot wins over whatever the local tick had derived.
    display.apply_snapshot(&snapshot(true, 500));
    assert_eq!(display.reading(), TimerReading { running: true, remaining_seconds: 500 });
    advance(Duration::from_millis(1100)).await;
    assert_eq!(display.reading().remaining_seconds, 499);
}

#[tokio::test(start_paused = true)]
async fn paused_snapshot_does_not_tick() {
    let display = CountdownDisplay::new();
    display.apply_snapshot(&snapshot(false, 120));
    advance(Duration::from_secs(5)).await;
    assert_eq!(display.reading(), TimerReading { running: false, remaining_seconds: 120 });
}

#[tokio::test(start_paused = true)]
async fn countdown_stops_at_zero_and_never_goes_negative() {
    let display = CountdownDisplay::new();
    display.apply_snapshot(&snapshot(true, 2));

    advance(Duration::from_millis(1100)).await;
    assert_eq!(display.reading(), TimerReading { running: true, remaining_seconds: 1 });

    advance(Duration::from_millis(1000)).await;
    assert_eq!(display.reading(), TimerReading::IDLE);

    advance(Duration::from_secs(10)).await;
    assert_eq!(display.reading(), TimerReading::IDLE);
}

#[tokio::test(start_paused = true)]
async fn running_zero_snapshot_is_treated_as_idle() {
    let display = CountdownDisplay::new();
    display.apply_snapshot(&snapshot(true, 0));
    advance(Duration::from_secs(3)).await;
    assert_eq!(display.reading(), TimerReading::IDLE);
}

#[tokio::test(start_paused = true)]
async fn mid_countdown_joiner_sees_the_servers_remainder() {
    let display = CountdownDisplay::new();
    display.apply_snapshot(&snapshot(true, 137));
    assert_eq!(display.reading().mmss(), "02:17");
}

#[tokio::test(start_paused = true)]
async fn reset_snaps_the_display_back_to_idle() {
    let display = CountdownDisplay::new();
    display.apply_snapshot(&snapshot(true, 300));
    advance(Duration::from_millis(2100)).await;

    display.apply_reset();
    assert_eq!(display.reading(), TimerReading::IDLE);
    advance(Duration::from_secs(5)).await;
    assert_eq!(display.reading(), TimerReading::IDLE);
}

#[test]
fn mmss_formatting() {
    assert_eq!(TimerReading { running: true, remaining_seconds: 300 }.mmss(), "05:00");
    assert_eq!(TimerReading { running: true, remaining_seconds: 299 }.mmss(), "04:59");
    assert_eq!(TimerReading { running: false, remaining_seconds: 0 }.mmss(), "00:00");
    assert_eq!(TimerReading { running: true, remaining_seconds: 3600 }.mmss(), "60:00");
}

// =============================================================================
// TIMER CONTROLLER
// =============================================================================

#[tokio::test(start_paused = true)]
async fn start_sends_a_running_command() {
    let mut stub = stub();
    let controller = TimerController::new(stub.manager.clone(), code());

    controller.start(300).await.expect("start");
    assert_eq!(
        stub.sent.recv().await.expect("sent"),
        ClientMessage::TimerCommand { code: code(), running: true, remaining_seconds: 300 }
    );
}

#[tokio::test(start_paused = true)]
async fn minute_presets_send_whole_minute_durations() {
    let mut stub = stub();
    let controller = TimerController::new(stub.manager.clone(), code());

    for minutes in PRESET_MINUTES {
        controller.start_minutes(minutes).await.expect("start");
        assert_eq!(
            stub.sent.recv().await.expect("sent"),
            ClientMessage::TimerCommand {
                code: code(),
                running: true,
                remaining_seconds: minutes * 60,
            }
        );
    }

    let err = controller.start_minutes(0).await.expect_err("zero minutes");
    assert!(matches!(err, TimerInputError::ZeroDuration));
}

#[tokio::test(start_paused = true)]
async fn zero_start_is_refused_locally() {
    let mut stub = stub();
    let controller = TimerController::new(stub.manager.clone(), code());

    let err = controller.start(0).await.expect_err("zero start");
    assert!(matches!(err, TimerInputError::ZeroDuration));
    assert!(matches!(stub.sent.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn stop_sends_the_local_estimate() {
    let mut stub = stub();
    let controller = TimerController::new(stub.manager.clone(), code());

    controller.stop(142).await.expect("stop");
    assert_eq!(
        stub.sent.recv().await.expect("sent"),
        ClientMessage::TimerCommand { code: code(), running: false, remaining_seconds: 142 }
    );
}

#[tokio::test(start_paused = true)]
async fn toggle_follows_the_current_reading() {
    let mut stub = stub();
    let controller = TimerController::new(stub.manager.clone(), code());

    controller
        .toggle(TimerReading { running: true, remaining_seconds: 90 })
        .await
        .expect("toggle to stop");
    assert_eq!(
        stub.sent.recv().await.expect("sent"),
        ClientMessage::TimerCommand { code: code(), running: false, remaining_seconds: 90 }
    );

    controller
        .toggle(TimerReading { running: false, remaining_seconds: 90 })
        .await
        .expect("toggle to start");
    assert_eq!(
        stub.sent.recv().await.expect("sent"),
        ClientMessage::TimerCommand { code: code(), running: true, remaining_seconds: 90 }
    );

    let err = controller.toggle(TimerReading::IDLE).await.expect_err("idle zero");
    assert!(matches!(err, TimerInputError::ZeroDuration));
}

#[tokio::test(start_paused = true)]
async fn reset_and_request_state_use_their_own_messages() {
    let mut stub = stub();
    let controller = TimerController::new(stub.manager.clone(), code());

    controller.reset().await.expect("reset");
    assert_eq!(stub.sent.recv().await.expect("sent"), ClientMessage::TimerReset { code: code() });

    controller.request_state().await.expect("request");
    assert_eq!(
        stub.sent.recv().await.expect("sent"),
        ClientMessage::RequestTimerState { code: code() }
    );
}
