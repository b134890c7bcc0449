//! Countdown clock state machine.
//!
//! A running clock never stores its remaining time. It stores a monotonic
//! start reference that is back-dated on every start, so the remaining
//! value is always `length_ms - (now - started_at)`:
//!
//! - **Stopped**: `paused_remaining_ms` is authoritative.
//! - **Running**: `started_at` is authoritative; `paused_remaining_ms` is stale.
//!
//! Every operation takes `now` explicitly so callers (and tests) control the
//! monotonic time source.

use std::time::{Duration, Instant};

/// Default shot clock length in milliseconds.
pub const DEFAULT_LENGTH_MS: u64 = 24_000;

/// Result of a remaining-time read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReading {
    /// Remaining time, clamped to `[0, length_ms]`.
    pub remaining_ms: u64,
    /// Whether the clock is running after this read.
    pub running: bool,
    /// True only for the read that observed the countdown hit zero and
    /// stopped the clock.
    pub expired: bool,
}

/// One countdown timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clock {
    length_ms: u64,
    running: bool,
    started_at: Option<Instant>,
    paused_remaining_ms: u64,
}

impl Default for Clock {
    fn default() -> Self {
        Self::with_length(DEFAULT_LENGTH_MS)
    }
}

impl Clock {
    /// Create a stopped clock showing its full length.
    pub fn with_length(length_ms: u64) -> Self {
        Self {
            length_ms,
            running: false,
            started_at: None,
            paused_remaining_ms: length_ms,
        }
    }

    pub fn length_ms(&self) -> u64 {
        self.length_ms
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Stopped → Running. No-op while running.
    ///
    /// The start reference is placed `length_ms - paused_remaining_ms` in the
    /// past, so a resumed clock continues from where it was paused.
    pub fn start(&mut self, now: Instant) {
        if self.running {
            return;
        }
        let already_elapsed =
            Duration::from_millis(self.length_ms.saturating_sub(self.paused_remaining_ms));
        // `checked_sub` only fails when the monotonic origin is younger than
        // the elapsed portion (right after boot); count from `now` then.
        self.started_at = Some(now.checked_sub(already_elapsed).unwrap_or(now));
        self.running = true;
    }

    /// Running → Stopped, freezing the remaining time. No-op while stopped.
    pub fn stop(&mut self, now: Instant) {
        if !self.running {
            return;
        }
        self.paused_remaining_ms = self.running_remaining(now);
        self.running = false;
        self.started_at = None;
    }

    /// Any state → Stopped at full length. `to_ms` replaces the length.
    pub fn reset(&mut self, to_ms: Option<u64>) {
        if let Some(length_ms) = to_ms {
            self.length_ms = length_ms;
        }
        self.paused_remaining_ms = self.length_ms;
        self.started_at = None;
        self.running = false;
    }

    /// Operator-entered duration. Same as `reset(Some(value_ms))`.
    pub fn set(&mut self, value_ms: u64) {
        self.reset(Some(value_ms));
    }

    /// Read the remaining time.
    ///
    /// A running clock whose countdown has reached zero is stopped by this
    /// read (frozen at 0, start reference cleared) and the reading reports
    /// `expired = true`. Callers hold the clock's lock for the whole call, so
    /// the read and the transition are one atomic step.
    pub fn read(&mut self, now: Instant) -> ClockReading {
        if !self.running {
            return ClockReading {
                remaining_ms: self.paused_remaining_ms,
                running: false,
                expired: false,
            };
        }

        let remaining_ms = self.running_remaining(now);
        if remaining_ms == 0 {
            self.paused_remaining_ms = 0;
            self.running = false;
            self.started_at = None;
            return ClockReading {
                remaining_ms: 0,
                running: false,
                expired: true,
            };
        }

        ClockReading {
            remaining_ms,
            running: true,
            expired: false,
        }
    }

    /// Shorthand for `read(now).remaining_ms`.
    pub fn remaining_ms(&mut self, now: Instant) -> u64 {
        self.read(now).remaining_ms
    }

    fn running_remaining(&self, now: Instant) -> u64 {
        match self.started_at {
            Some(started_at) => {
                let elapsed_ms = now.saturating_duration_since(started_at).as_millis();
                let elapsed_ms = u64::try_from(elapsed_ms).unwrap_or(u64::MAX);
                self.length_ms.saturating_sub(elapsed_ms)
            }
            None => self.paused_remaining_ms,
        }
    }
}
