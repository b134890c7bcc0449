//! CLI definition using clap derive.

use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use shotclock_daemon::{DaemonConfig, IdlePolicy};

#[derive(Parser)]
#[command(name = "shotclock", about = "Live shot clock server", version)]
pub struct Cli {
    #[command(flatten)]
    pub serve: ServeOpts,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the daemon (default when no subcommand is given)
    Serve,
    /// Print one session's state as `MM:SS.T|0-or-1`
    State {
        /// Session key (letters, digits, `-`, `_`)
        game_id: String,
    },
    /// List every live session
    List,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeOpts {
    /// WebSocket push gateway address
    #[arg(long, env = "SHOTCLOCK_WS_ADDR", default_value = "127.0.0.1:8765")]
    pub ws_addr: SocketAddr,

    /// HTTP pull surface address (also used by `state` and `list`)
    #[arg(
        long,
        env = "SHOTCLOCK_HTTP_ADDR",
        default_value = "127.0.0.1:8000",
        global = true
    )]
    pub http_addr: SocketAddr,

    /// Session driver publish rate in Hz
    #[arg(
        long,
        env = "SHOTCLOCK_TICK_HZ",
        default_value_t = 10,
        value_parser = clap::value_parser!(u32).range(1..=100)
    )]
    pub tick_hz: u32,

    /// Aggregate driver publish rate in Hz
    #[arg(
        long,
        env = "SHOTCLOCK_AGGREGATE_HZ",
        default_value_t = 10,
        value_parser = clap::value_parser!(u32).range(1..=100)
    )]
    pub aggregate_hz: u32,

    /// SSE pull stream rate in Hz
    #[arg(
        long,
        env = "SHOTCLOCK_STREAM_HZ",
        default_value_t = 5,
        value_parser = clap::value_parser!(u32).range(1..=100)
    )]
    pub stream_hz: u32,

    /// Length of newly created clocks in milliseconds
    #[arg(long, env = "SHOTCLOCK_DEFAULT_LENGTH_MS", default_value_t = 24_000)]
    pub default_length_ms: u64,

    /// What drivers do when their last observer leaves: keep-running | stop-when-idle
    #[arg(long, env = "SHOTCLOCK_IDLE_POLICY", default_value = "keep-running")]
    pub idle_policy: IdlePolicy,

    /// Maximum concurrent WebSocket observers
    #[arg(long, env = "SHOTCLOCK_MAX_CONNECTIONS", default_value_t = 256)]
    pub max_connections: usize,

    /// Extra browser origin accepted by the WebSocket gateway (repeatable)
    #[arg(long = "allowed-origin", env = "SHOTCLOCK_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,
}

impl ServeOpts {
    pub fn to_config(&self) -> DaemonConfig {
        DaemonConfig {
            ws_addr: self.ws_addr,
            http_addr: self.http_addr,
            tick_hz: self.tick_hz,
            aggregate_hz: self.aggregate_hz,
            stream_hz: self.stream_hz,
            default_length_ms: self.default_length_ms,
            idle_policy: self.idle_policy,
            max_connections: self.max_connections,
            allowed_origins: self.allowed_origins.clone(),
        }
    }
}
