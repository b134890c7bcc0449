//! HTTP pull surfaces: stateless snapshots and an SSE pull stream.
//!
//! Lower-fidelity alternatives to the WebSocket push channel. Every route
//! reads through the same registry path, so reads create unknown sessions
//! and expire finished clocks exactly like a driver poll.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::Stream;
use serde::Serialize;
use shotclock_core::{ClockListing, SessionRegistry, SessionSnapshot, validate_session_key};
use tokio::net::TcpListener;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::error::DaemonError;
use crate::state::SharedState;

#[derive(Debug)]
pub(crate) enum ApiError {
    InvalidSessionKey(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidSessionKey(key) => (
                StatusCode::NOT_FOUND,
                Json(ErrorBody {
                    error: format!("invalid session key: {key}"),
                }),
            )
                .into_response(),
        }
    }
}

fn checked_key(game_id: String) -> Result<String, ApiError> {
    if validate_session_key(&game_id) {
        Ok(game_id)
    } else {
        Err(ApiError::InvalidSessionKey(game_id))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn state_json(
    Path(game_id): Path<String>,
    State(state): State<SharedState>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let key = checked_key(game_id)?;
    Ok(Json(state.registry.snapshot(&key, Instant::now())))
}

async fn state_plain(
    Path(game_id): Path<String>,
    State(state): State<SharedState>,
) -> Result<String, ApiError> {
    let key = checked_key(game_id)?;
    Ok(state.registry.snapshot(&key, Instant::now()).to_plain_line())
}

async fn all_clocks(State(state): State<SharedState>) -> Json<ClockListing> {
    Json(state.registry.listing(Instant::now()))
}

async fn stream_sse(
    Path(game_id): Path<String>,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let key = checked_key(game_id)?;
    tracing::debug!(session = %key, "sse stream opened");
    let stream = snapshot_stream(
        Arc::clone(&state.registry),
        key,
        state.config.stream_period(),
        state.cancel.clone(),
    );
    Ok(([(header::CACHE_CONTROL, "no-cache")], Sse::new(stream)))
}

/// Emit the session's snapshot every `period` until the client disconnects
/// or the daemon shuts down. Ending on cancellation lets graceful shutdown
/// finish while streams are open.
fn snapshot_stream(
    registry: Arc<SessionRegistry>,
    key: String,
    period: std::time::Duration,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    futures_util::stream::unfold(
        (ticker, registry, key, cancel),
        |(mut ticker, registry, key, cancel)| async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = ticker.tick() => {}
            }
            let snapshot = registry.snapshot(&key, Instant::now());
            let event = Event::default().json_data(snapshot);
            Some((event, (ticker, registry, key, cancel)))
        },
    )
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/clocks", get(all_clocks))
        .route("/api/clock/:game_id/state", get(state_json))
        .route("/api/clock/:game_id/state.txt", get(state_plain))
        .route("/api/clock/:game_id/stream", get(stream_sse))
        .with_state(state)
}

/// HTTP server for the pull surfaces.
pub struct HttpServer {
    addr: SocketAddr,
    state: SharedState,
    cancel: CancellationToken,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, state: SharedState, cancel: CancellationToken) -> Self {
        Self {
            addr,
            state,
            cancel,
        }
    }

    pub async fn bind(&self) -> Result<(TcpListener, SocketAddr), DaemonError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| DaemonError::Bind {
                what: "http",
                addr: self.addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "http server listening");
        Ok((listener, local_addr))
    }

    /// Serve on a pre-bound listener until cancellation.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), DaemonError> {
        let cancel = self.cancel.clone();
        axum::serve(listener, router(Arc::clone(&self.state)))
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                tracing::info!("http server: cancellation requested, shutting down");
            })
            .await?;
        Ok(())
    }
}
