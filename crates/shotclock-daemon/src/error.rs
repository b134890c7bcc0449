//! Error types for the daemon services.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("failed to bind {what} listener on {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("json encode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Rejected `--idle-policy` value.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown idle policy `{0}` (expected `keep-running` or `stop-when-idle`)")]
pub struct ParseIdlePolicyError(pub String);
