//! Daemon configuration.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use shotclock_core::DEFAULT_LENGTH_MS;

use crate::error::ParseIdlePolicyError;

pub const DEFAULT_WS_PORT: u16 = 8765;
pub const DEFAULT_HTTP_PORT: u16 = 8000;
pub const DEFAULT_TICK_HZ: u32 = 10;
pub const DEFAULT_AGGREGATE_HZ: u32 = 10;
pub const DEFAULT_STREAM_HZ: u32 = 5;
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

/// What a broadcast driver does once its channel has no observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdlePolicy {
    /// Keep ticking until the daemon shuts down.
    #[default]
    KeepRunning,
    /// Exit at the first tick with an empty audience; the next observer
    /// starts a fresh driver.
    StopWhenIdle,
}

impl FromStr for IdlePolicy {
    type Err = ParseIdlePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep-running" | "keep" => Ok(IdlePolicy::KeepRunning),
            "stop-when-idle" | "stop" => Ok(IdlePolicy::StopWhenIdle),
            other => Err(ParseIdlePolicyError(other.to_string())),
        }
    }
}

impl fmt::Display for IdlePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdlePolicy::KeepRunning => f.write_str("keep-running"),
            IdlePolicy::StopWhenIdle => f.write_str("stop-when-idle"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// WebSocket push gateway address.
    pub ws_addr: SocketAddr,
    /// HTTP pull surface address.
    pub http_addr: SocketAddr,
    /// Session driver publish rate.
    pub tick_hz: u32,
    /// Aggregate driver publish rate.
    pub aggregate_hz: u32,
    /// SSE pull stream emission rate.
    pub stream_hz: u32,
    /// Length of newly created clocks.
    pub default_length_ms: u64,
    pub idle_policy: IdlePolicy,
    pub max_connections: usize,
    /// Extra browser origins accepted by the WebSocket gateway.
    pub allowed_origins: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            ws_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_WS_PORT)),
            http_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_HTTP_PORT)),
            tick_hz: DEFAULT_TICK_HZ,
            aggregate_hz: DEFAULT_AGGREGATE_HZ,
            stream_hz: DEFAULT_STREAM_HZ,
            default_length_ms: DEFAULT_LENGTH_MS,
            idle_policy: IdlePolicy::default(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            allowed_origins: Vec::new(),
        }
    }
}

impl DaemonConfig {
    pub fn tick_period(&self) -> Duration {
        period(self.tick_hz)
    }

    pub fn aggregate_period(&self) -> Duration {
        period(self.aggregate_hz)
    }

    pub fn stream_period(&self) -> Duration {
        period(self.stream_hz)
    }
}

fn period(hz: u32) -> Duration {
    Duration::from_secs(1) / hz.max(1)
}
