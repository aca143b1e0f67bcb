//! Countdown timer projection and control.
//!
//! DESIGN
//! ======
//! The server owns timer truth. This side keeps only a projection seeded by
//! the last authoritative snapshot: every [`TimerSnapshot`] that arrives
//! REPLACES the local state wholesale, and between snapshots a local tick
//! task derives the displayed value from the seed and the local monotonic
//! clock. The tick never accumulates: each second it recomputes
//! `seed - elapsed`, so a delayed or coalesced tick cannot drift the
//! display, and the value can never go below zero.
//!
//! [`TimerController`] is the write side. It only sends commands; it never
//! touches the projection directly. The display moves when the server's
//! snapshot comes back, which keeps every member (including the sender) on
//! identical state.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use protocol::{ClientMessage, SessionCode, TimerSnapshot};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::connection::{ConnectionError, ConnectionManager};

#[derive(Debug, thiserror::Error)]
pub enum TimerInputError {
    #[error("timer cannot start from zero")]
    ZeroDuration,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// What the countdown currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerReading {
    pub running: bool,
    pub remaining_seconds: u64,
}

impl TimerReading {
    pub const IDLE: Self = Self { running: false, remaining_seconds: 0 };

    /// `MM:SS` rendering, e.g. `05:00`.
    #[must_use]
    pub fn mmss(&self) -> String {
        let minutes = self.remaining_seconds / 60;
        let seconds = self.remaining_seconds % 60;
        format!("{minutes:02}:{seconds:02}")
    }
}

// =============================================================================
// COUNTDOWN DISPLAY
// =============================================================================

/// Locally ticking projection of the server's timer.
#[derive(Clone)]
pub struct CountdownDisplay {
    inner: Arc<Inner>,
}

struct Inner {
    reading_tx: watch::Sender<TimerReading>,
    tick: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .tick
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl Default for CountdownDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl CountdownDisplay {
    #[must_use]
    pub fn new() -> Self {
        let (reading_tx, _) = watch::channel(TimerReading::IDLE);
        Self { inner: Arc::new(Inner { reading_tx, tick: Mutex::new(None) }) }
    }

    /// Replace the projection with an authoritative snapshot.
    ///
    /// The previous tick task is stopped unconditionally; at most one tick
    /// task exists per display, always derived from the latest seed.
    pub fn apply_snapshot(&self, snapshot: &TimerSnapshot) {
        let seed = TimerReading {
            running: snapshot.running && snapshot.remaining_seconds > 0,
            remaining_seconds: snapshot.remaining_seconds,
        };
        let mut tick = self.inner.tick.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = tick.take() {
            handle.abort();
        }
        self.inner.reading_tx.send_replace(seed);

        if seed.running {
            let reading_tx = self.inner.reading_tx.clone();
            let seeded = seed.remaining_seconds;
            *tick = Some(tokio::spawn(async move {
                let start = tokio::time::Instant::now();
                let mut interval = tokio::time::interval_at(
                    start + Duration::from_secs(1),
                    Duration::from_secs(1),
                );
                loop {
                    interval.tick().await;
                    let remaining = seeded.saturating_sub(start.elapsed().as_secs());
                    if remaining == 0 {
                        reading_tx.send_replace(TimerReading::IDLE);
                        return;
                    }
                    reading_tx
                        .send_replace(TimerReading { running: true, remaining_seconds: remaining });
                }
            }));
        }
    }

    /// Snap back to idle zero, as after a reset broadcast.
    pub fn apply_reset(&self) {
        let mut tick = self.inner.tick.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = tick.take() {
            handle.abort();
        }
        self.inner.reading_tx.send_replace(TimerReading::IDLE);
    }

    #[must_use]
    pub fn reading(&self) -> TimerReading {
        *self.inner.reading_tx.borrow()
    }

    /// Watch every displayed value change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<TimerReading> {
        self.inner.reading_tx.subscribe()
    }
}

// =============================================================================
// TIMER CONTROLLER
// =============================================================================

/// Duration presets offered by the timer UI, in minutes.
pub const PRESET_MINUTES: [u64; 4] = [5, 10, 15, 20];

/// Write side of the timer. Commands go to the server; the display updates
/// when the authoritative snapshot comes back.
#[derive(Clone)]
pub struct TimerController {
    connection: ConnectionManager,
    code: SessionCode,
}

impl TimerController {
    #[must_use]
    pub fn new(connection: ConnectionManager, code: SessionCode) -> Self {
        Self { connection, code }
    }

    /// Start from a whole-minute duration (presets and custom input).
    ///
    /// # Errors
    ///
    /// [`TimerInputError::ZeroDuration`] for zero minutes.
    pub async fn start_minutes(&self, minutes: u64) -> Result<(), TimerInputError> {
        self.start(minutes.saturating_mul(60)).await
    }

    /// Start (or restart) the countdown from `seconds`.
    ///
    /// # Errors
    ///
    /// [`TimerInputError::ZeroDuration`] for a zero start, which the server
    /// would reject anyway.
    pub async fn start(&self, seconds: u64) -> Result<(), TimerInputError> {
        if seconds == 0 {
            return Err(TimerInputError::ZeroDuration);
        }
        self.connection
            .send(ClientMessage::TimerCommand {
                code: self.code.clone(),
                running: true,
                remaining_seconds: seconds,
            })
            .await?;
        Ok(())
    }

    /// Pause the countdown. `remaining_estimate` is this side's displayed
    /// value; the server substitutes its own computed remainder.
    ///
    /// # Errors
    ///
    /// Propagates [`ConnectionError`] when the socket is down.
    pub async fn stop(&self, remaining_estimate: u64) -> Result<(), TimerInputError> {
        self.connection
            .send(ClientMessage::TimerCommand {
                code: self.code.clone(),
                running: false,
                remaining_seconds: remaining_estimate,
            })
            .await?;
        Ok(())
    }

    /// Start or stop based on what the display currently shows.
    ///
    /// # Errors
    ///
    /// [`TimerInputError::ZeroDuration`] when toggling an idle display with
    /// nothing on the clock.
    pub async fn toggle(&self, reading: TimerReading) -> Result<(), TimerInputError> {
        if reading.running {
            self.stop(reading.remaining_seconds).await
        } else {
            self.start(reading.remaining_seconds).await
        }
    }

    /// Clear the timer for the whole session.
    ///
    /// # Errors
    ///
    /// Propagates [`ConnectionError`] when the socket is down.
    pub async fn reset(&self) -> Result<(), TimerInputError> {
        self.connection
            .send(ClientMessage::TimerReset { code: self.code.clone() })
            .await?;
        Ok(())
    }

    /// Ask for a fresh authoritative snapshot, as done right after joining.
    ///
    /// # Errors
    ///
    /// Propagates [`ConnectionError`] when the socket is down.
    pub async fn request_state(&self) -> Result<(), TimerInputError> {
        self.connection
            .send(ClientMessage::RequestTimerState { code: self.code.clone() })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "timer_test.rs"]
mod tests;
