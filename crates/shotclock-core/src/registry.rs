//! Session registry: session key → clock, created on first reference.
//!
//! Entries are never removed. Each clock sits behind its own mutex; the map
//! lock is only held for lookup and insertion, never while a clock is read.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::clock::{Clock, ClockReading, DEFAULT_LENGTH_MS};
use crate::command::Command;
use crate::snapshot::{
    AggregateEntry, AggregateSnapshot, ClockListing, ClockSummary, SessionSnapshot,
};

pub type SharedClock = Arc<Mutex<Clock>>;

/// Maximum accepted session key length.
pub const MAX_SESSION_KEY_LEN: usize = 64;

/// Validate a session key: `[A-Za-z0-9_-]{1,64}`.
pub fn validate_session_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_SESSION_KEY_LEN
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[derive(Debug)]
pub struct SessionRegistry {
    default_length_ms: u64,
    sessions: RwLock<HashMap<String, SharedClock>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_LENGTH_MS)
    }
}

impl SessionRegistry {
    /// New clocks start stopped at `default_length_ms`.
    pub fn new(default_length_ms: u64) -> Self {
        Self {
            default_length_ms,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Get the clock for `key`, creating a default one if absent.
    pub fn clock(&self, key: &str) -> SharedClock {
        if let Some(clock) = self.sessions.read().get(key) {
            return Arc::clone(clock);
        }
        let length_ms = self.default_length_ms;
        let mut sessions = self.sessions.write();
        let clock = sessions
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Clock::with_length(length_ms))));
        Arc::clone(clock)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sessions.read().contains_key(key)
    }

    /// Read one session under its clock lock (may auto-expire it).
    pub fn read(&self, key: &str, now: Instant) -> ClockReading {
        self.clock(key).lock().read(now)
    }

    pub fn snapshot(&self, key: &str, now: Instant) -> SessionSnapshot {
        self.read(key, now).into()
    }

    /// Apply a control command to the session's clock.
    pub fn apply(&self, key: &str, command: Command, now: Instant) {
        let clock = self.clock(key);
        let mut clock = clock.lock();
        command.apply(&mut clock, now);
    }

    /// Copy out `(key, clock)` handles so callers can read clocks without
    /// holding the map lock.
    fn entries(&self) -> Vec<(String, SharedClock)> {
        self.sessions
            .read()
            .iter()
            .map(|(key, clock)| (key.clone(), Arc::clone(clock)))
            .collect()
    }

    /// Sorted view of every session.
    pub fn aggregate(&self, now: Instant) -> AggregateSnapshot {
        let entries = self
            .entries()
            .into_iter()
            .map(|(key, clock)| {
                let snapshot: SessionSnapshot = clock.lock().read(now).into();
                AggregateEntry::new(key, snapshot)
            })
            .collect();
        AggregateSnapshot::from_entries(entries)
    }

    /// Per-session summary including configured length.
    pub fn listing(&self, now: Instant) -> ClockListing {
        let clocks: std::collections::BTreeMap<String, ClockSummary> = self
            .entries()
            .into_iter()
            .map(|(key, clock)| {
                let mut clock = clock.lock();
                let reading = clock.read(now);
                let summary = ClockSummary {
                    remaining_ms: reading.remaining_ms,
                    running: reading.running,
                    length_ms: clock.length_ms(),
                };
                (key, summary)
            })
            .collect();
        let count = clocks.len();
        ClockListing { clocks, count }
    }
}
