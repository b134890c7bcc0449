//! Inbound control commands: `{"cmd": "start"|"stop"|"reset"|"set", "value"?: n}`.

use std::time::Instant;

use serde_json::Value;

use crate::clock::Clock;
use crate::error::CommandError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Reset,
    /// `None` resets to the current length.
    Set(Option<u64>),
}

impl Command {
    /// Parse a raw text frame.
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| CommandError::InvalidJson(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Parse an already-decoded JSON object.
    pub fn from_value(value: &Value) -> Result<Self, CommandError> {
        let cmd = value
            .get("cmd")
            .and_then(Value::as_str)
            .ok_or(CommandError::MissingCmd)?;

        match cmd {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "reset" => Ok(Command::Reset),
            "set" => match value.get("value") {
                None => Ok(Command::Set(None)),
                Some(raw) => parse_millis(raw).map(|ms| Command::Set(Some(ms))),
            },
            other => Err(CommandError::UnknownCmd(other.to_string())),
        }
    }

    /// Apply to a clock. Commands never publish; drivers pick up the change
    /// on their next tick.
    pub fn apply(self, clock: &mut Clock, now: Instant) {
        match self {
            Command::Start => clock.start(now),
            Command::Stop => clock.stop(now),
            Command::Reset => clock.reset(None),
            Command::Set(value) => clock.reset(value),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Reset => "reset",
            Command::Set(_) => "set",
        }
    }
}

/// Accepts JSON integers, non-negative finite floats (truncated) and decimal
/// strings.
fn parse_millis(raw: &Value) -> Result<u64, CommandError> {
    let invalid = || CommandError::InvalidValue(raw.to_string());
    match raw {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                return Ok(v);
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f >= 0.0 && f < u64::MAX as f64 => Ok(f as u64),
                _ => Err(invalid()),
            }
        }
        Value::String(s) => s.trim().parse::<u64>().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}
