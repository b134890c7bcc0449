//! Snapshot and wire types shared by the push and pull surfaces.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clock::ClockReading;

/// Point-in-time state of one session: `{remaining_ms, running}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub remaining_ms: u64,
    pub running: bool,
}

impl From<ClockReading> for SessionSnapshot {
    fn from(reading: ClockReading) -> Self {
        Self {
            remaining_ms: reading.remaining_ms,
            running: reading.running,
        }
    }
}

impl SessionSnapshot {
    /// Plain-text form `MM:SS.T|0` or `MM:SS.T|1`.
    pub fn to_plain_line(&self) -> String {
        format!(
            "{}|{}",
            format_display(self.remaining_ms),
            u8::from(self.running)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockStatus {
    Running,
    Stopped,
}

impl From<bool> for ClockStatus {
    fn from(running: bool) -> Self {
        if running {
            ClockStatus::Running
        } else {
            ClockStatus::Stopped
        }
    }
}

/// One row of the aggregate view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateEntry {
    pub game_id: String,
    pub time_display: String,
    pub remaining_ms: u64,
    pub running: bool,
    pub status: ClockStatus,
}

impl AggregateEntry {
    pub fn new(game_id: impl Into<String>, snapshot: SessionSnapshot) -> Self {
        Self {
            game_id: game_id.into(),
            time_display: format_display(snapshot.remaining_ms),
            remaining_ms: snapshot.remaining_ms,
            running: snapshot.running,
            status: snapshot.running.into(),
        }
    }
}

/// All live sessions, sorted ascending by `game_id`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub active_clocks: Vec<AggregateEntry>,
    pub count: usize,
}

impl AggregateSnapshot {
    /// Build from unordered entries; sorts by `game_id`.
    pub fn from_entries(mut entries: Vec<AggregateEntry>) -> Self {
        entries.sort_by(|a, b| a.game_id.cmp(&b.game_id));
        let count = entries.len();
        Self {
            active_clocks: entries,
            count,
        }
    }
}

/// Per-session row of the all-clocks listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSummary {
    pub remaining_ms: u64,
    pub running: bool,
    pub length_ms: u64,
}

/// `{"clocks": {key: {...}}, "count": n}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClockListing {
    pub clocks: BTreeMap<String, ClockSummary>,
    pub count: usize,
}

/// Frames sent over the push channel, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushFrame {
    Tick(SessionSnapshot),
    Clocks(AggregateSnapshot),
}

/// Render milliseconds as `MM:SS.T`.
pub fn format_display(remaining_ms: u64) -> String {
    let total_secs = remaining_ms / 1000;
    let mins = total_secs / 60;
    let secs = total_secs % 60;
    let tenths = (remaining_ms % 1000) / 100;
    format!("{mins:02}:{secs:02}.{tenths}")
}
