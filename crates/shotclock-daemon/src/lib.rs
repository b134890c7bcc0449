//! shotclock-daemon: channel hub, broadcast drivers, and the WebSocket/HTTP
//! surfaces over a shared session registry.

pub mod config;
pub mod driver;
pub mod error;
pub mod http_server;
pub mod hub;
pub mod state;
pub mod ws_server;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use config::{DaemonConfig, IdlePolicy};
pub use error::DaemonError;
pub use state::{ServiceState, SharedState};

use crate::http_server::HttpServer;
use crate::ws_server::WsServer;

/// Run both servers until `cancel` fires or one of them fails.
///
/// Both listeners are bound before anything is served, so a bad address is
/// reported before any observer can connect.
pub async fn run(config: DaemonConfig, cancel: CancellationToken) -> Result<(), DaemonError> {
    tracing::info!(
        ws_addr = %config.ws_addr,
        http_addr = %config.http_addr,
        tick_hz = config.tick_hz,
        aggregate_hz = config.aggregate_hz,
        stream_hz = config.stream_hz,
        default_length_ms = config.default_length_ms,
        idle_policy = %config.idle_policy,
        "shotclock daemon starting"
    );

    let state = ServiceState::new(config.clone(), cancel.clone());
    let ws = WsServer::new(config.ws_addr, Arc::clone(&state), cancel.clone());
    let http = HttpServer::new(config.http_addr, Arc::clone(&state), cancel.clone());

    let (ws_listener, _) = ws.bind().await?;
    let (http_listener, _) = http.bind().await?;

    let result = tokio::select! {
        r = ws.serve(ws_listener) => r,
        r = http.serve(http_listener) => r,
    };
    if !cancel.is_cancelled() {
        tracing::warn!("server exited unexpectedly");
    }

    cancel.cancel();
    state.drivers.wait_stopped().await;
    tracing::info!("daemon stopped");
    result
}
