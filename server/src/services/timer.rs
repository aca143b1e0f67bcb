//! Authoritative countdown timer.
//!
//! DESIGN
//! ======
//! The server is the single clock authority. Controllers send intent
//! (`timerCommand`); this module applies it against a monotonic reference
//! and produces the snapshot that gets broadcast to every member. The
//! server never pushes ticks — one snapshot per state change is enough,
//! clients extrapolate locally from their own wall clocks.
//!
//! A running timer stores the remaining seconds at its reference instant;
//! the live value is derived on every observation and clamped at zero.
//! Crossing zero settles the state to `Idle` exactly once.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use protocol::TimerSnapshot;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TimerError {
    #[error("cannot start a timer with zero seconds remaining")]
    ZeroStart,
}

/// Current time as milliseconds since Unix epoch, for snapshot stamping.
#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

/// Server-side timer state for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAuthority {
    /// No time set.
    Idle,
    /// Time set but not counting down.
    Paused { remaining: u64 },
    /// Counting down since `reference`, at which point `remaining` seconds
    /// were left.
    Running { remaining: u64, reference: Instant },
}

impl TimerAuthority {
    /// Apply a controller command and return the resulting broadcast state.
    ///
    /// A start command seeds a fresh countdown from the commanded value; a
    /// stop command freezes at the server-computed remaining time, ignoring
    /// the client's estimate (the server clock is authoritative).
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::ZeroStart`] for a start command with zero
    /// seconds; the caller surfaces this instead of starting a dead timer.
    pub fn apply_command(
        &mut self,
        running: bool,
        remaining_seconds: u64,
        now: Instant,
    ) -> Result<(bool, u64), TimerError> {
        if running {
            if remaining_seconds == 0 {
                return Err(TimerError::ZeroStart);
            }
            *self = Self::Running { remaining: remaining_seconds, reference: now };
            return Ok((true, remaining_seconds));
        }

        let frozen = match *self {
            Self::Running { .. } => self.remaining_at(now),
            Self::Paused { remaining } => remaining,
            // Stopping an idle timer: accept the client's value so a
            // "set custom time" lands as Paused(n) without a start.
            Self::Idle => remaining_seconds,
        };
        *self = if frozen == 0 { Self::Idle } else { Self::Paused { remaining: frozen } };
        Ok((false, frozen))
    }

    /// Clear the timer for everyone.
    pub fn reset(&mut self) {
        *self = Self::Idle;
    }

    /// Observe the live state, settling a finished countdown to `Idle`.
    pub fn observe(&mut self, now: Instant) -> (bool, u64) {
        match *self {
            Self::Idle => (false, 0),
            Self::Paused { remaining } => (false, remaining),
            Self::Running { .. } => {
                let left = self.remaining_at(now);
                if left == 0 {
                    *self = Self::Idle;
                    (false, 0)
                } else {
                    (true, left)
                }
            }
        }
    }

    /// Observe and stamp a wire snapshot for broadcast.
    pub fn snapshot(&mut self, now: Instant) -> TimerSnapshot {
        let (running, remaining_seconds) = self.observe(now);
        TimerSnapshot { running, remaining_seconds, server_timestamp_ms: now_ms() }
    }

    /// Remaining seconds at `now`, clamped at zero.
    #[must_use]
    pub fn remaining_at(&self, now: Instant) -> u64 {
        match *self {
            Self::Idle => 0,
            Self::Paused { remaining } => remaining,
            Self::Running { remaining, reference } => {
                remaining.saturating_sub(now.saturating_duration_since(reference).as_secs())
            }
        }
    }
}

#[cfg(test)]
#[path = "timer_test.rs"]
mod tests;
