use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use shotclock_core::{Command, PushFrame, validate_session_key};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_util::sync::CancellationToken;

use crate::error::DaemonError;
use crate::hub::ChannelId;
use crate::state::{ServiceState, SharedState};

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Which channel an observer connection is bound to, taken from the
/// handshake path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `/ws/clock/<key>/`
    Session(String),
    /// `/ws/index/`
    Aggregate,
}

impl Route {
    /// Parse a request path. The trailing slash is optional.
    pub fn parse(path: &str) -> Option<Self> {
        let trimmed = path.strip_suffix('/').unwrap_or(path);
        if trimmed == "/ws/index" {
            return Some(Route::Aggregate);
        }
        let key = trimmed.strip_prefix("/ws/clock/")?;
        validate_session_key(key).then(|| Route::Session(key.to_string()))
    }

    pub fn channel(&self) -> ChannelId {
        match self {
            Route::Session(key) => ChannelId::session(key.as_str()),
            Route::Aggregate => ChannelId::Aggregate,
        }
    }
}

// ---------------------------------------------------------------------------
// Handshake validation
// ---------------------------------------------------------------------------

fn reject(status: http::StatusCode, body: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(body.to_string()));
    *resp.status_mut() = status;
    resp
}

/// Validate the `Origin` header on an incoming WebSocket upgrade request.
///
/// Allowed origins:
/// - absent (non-browser clients: scoreboard controllers, curl)
/// - `null` (file:// pages)
/// - `http://localhost*` and `http://127.0.0.1*`
/// - anything listed in `allowed`
fn validate_origin(req: &Request, allowed: &[String]) -> Result<(), ErrorResponse> {
    let Some(origin) = req.headers().get("origin") else {
        return Ok(());
    };
    let origin_str = origin.to_str().unwrap_or("");
    if origin_str == "null"
        || origin_str.starts_with("http://localhost")
        || origin_str.starts_with("http://127.0.0.1")
        || allowed.iter().any(|a| a == origin_str)
    {
        return Ok(());
    }
    tracing::warn!(origin = %origin_str, "ws: rejected connection from disallowed origin");
    Err(reject(http::StatusCode::FORBIDDEN, "Origin not allowed"))
}

fn route_request(req: &Request, allowed: &[String]) -> Result<Route, ErrorResponse> {
    validate_origin(req, allowed)?;
    Route::parse(req.uri().path()).ok_or_else(|| {
        tracing::debug!(path = %req.uri().path(), "ws: unknown path");
        reject(http::StatusCode::NOT_FOUND, "Unknown clock channel")
    })
}

// ---------------------------------------------------------------------------
// WsServer
// ---------------------------------------------------------------------------

/// Observer gateway: WebSocket push channel for session and aggregate views.
///
/// Each connection joins one channel's audience, receives an immediate
/// snapshot, and makes sure the matching driver is running. Session
/// observers may also send control commands.
pub struct WsServer {
    addr: SocketAddr,
    state: SharedState,
    cancel: CancellationToken,
    max_connections: usize,
}

impl WsServer {
    pub fn new(addr: SocketAddr, state: SharedState, cancel: CancellationToken) -> Self {
        let max_connections = state.config.max_connections;
        Self {
            addr,
            state,
            cancel,
            max_connections,
        }
    }

    /// Set the maximum number of concurrent WebSocket connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Bind to the configured address and return the actual local address.
    /// Useful when binding to port 0 to get an OS-assigned ephemeral port.
    pub async fn bind(&self) -> Result<(TcpListener, SocketAddr), DaemonError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| DaemonError::Bind {
                what: "websocket",
                addr: self.addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;
        tracing::info!(
            addr = %local_addr,
            max_connections = self.max_connections,
            "ws server listening"
        );
        Ok((listener, local_addr))
    }

    /// Run the accept loop on a pre-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), DaemonError> {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let permit = match semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    tracing::warn!(
                                        peer = %peer,
                                        max = self.max_connections,
                                        "ws: connection limit reached, rejecting"
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };
                            tracing::debug!(peer = %peer, "ws: TCP connection accepted");
                            let state = Arc::clone(&self.state);
                            let cancel = self.cancel.clone();
                            tokio::spawn(async move {
                                let _permit = permit;
                                accept_observer(stream, peer, state, cancel).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "ws: TCP accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("ws server: cancellation requested, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-observer handler
// ---------------------------------------------------------------------------

async fn accept_observer(
    stream: TcpStream,
    peer: SocketAddr,
    state: SharedState,
    cancel: CancellationToken,
) {
    let mut route = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        route = Some(route_request(req, &state.config.allowed_origins)?);
        Ok(resp)
    };
    let handshake = tokio_tungstenite::accept_hdr_async(stream, callback).await;

    let ws_stream = match handshake {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            tracing::debug!(peer = %peer, error = %e, "ws handshake failed");
            return;
        }
    };
    let Some(route) = route else {
        return;
    };

    tracing::debug!(peer = %peer, route = ?route, "ws observer connected");
    if let Err(e) = handle_observer(ws_stream, route, state, cancel).await {
        tracing::debug!(peer = %peer, error = %e, "ws observer handler finished with error");
    }
}

async fn handle_observer(
    ws_stream: WebSocketStream<TcpStream>,
    route: Route,
    state: SharedState,
    cancel: CancellationToken,
) -> Result<(), DaemonError> {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // Join the audience before the snapshot so no tick is lost in between;
    // anything queued before the snapshot is older than it and dropped.
    let mut subscription = state.hub.subscribe(&route.channel());
    let snapshot = immediate_snapshot(&state, &route);
    subscription.discard_pending();
    ws_tx
        .send(Message::Text(serde_json::to_string(&snapshot)?))
        .await?;

    match &route {
        Route::Session(key) => state.drivers.ensure_session(key),
        Route::Aggregate => state.drivers.ensure_aggregate(),
    };

    loop {
        tokio::select! {
            // --- incoming WebSocket message ---
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "ws read error, dropping observer");
                        return Err(e.into());
                    }
                    None => {
                        tracing::debug!("ws observer disconnected (stream ended)");
                        return Ok(());
                    }
                };

                match msg {
                    Message::Text(text) => handle_command(&state, &route, &text),
                    Message::Ping(data) => ws_tx.send(Message::Pong(data)).await?,
                    Message::Close(_) => {
                        tracing::debug!("ws observer sent close frame");
                        return Ok(());
                    }
                    _ => {}
                }
            }

            // --- driver frame ---
            frame = subscription.recv() => {
                match frame {
                    Ok(frame) => ws_tx.send(Message::Text(frame.to_string())).await?,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(
                            skipped,
                            channel = %subscription.channel(),
                            "ws observer lagging, frames skipped"
                        );
                    }
                    Err(RecvError::Closed) => return Ok(()),
                }
            }

            _ = cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}

fn immediate_snapshot(state: &ServiceState, route: &Route) -> PushFrame {
    let now = Instant::now();
    match route {
        Route::Session(key) => PushFrame::Tick(state.registry.snapshot(key, now)),
        Route::Aggregate => PushFrame::Clocks(state.registry.aggregate(now)),
    }
}

/// Apply an inbound control frame. Malformed input is logged and dropped;
/// nothing is sent back.
fn handle_command(state: &ServiceState, route: &Route, text: &str) {
    let Route::Session(key) = route else {
        tracing::debug!("ignoring command on aggregate channel");
        return;
    };
    match Command::parse(text) {
        Ok(command) => {
            state.registry.apply(key, command, Instant::now());
            tracing::debug!(session = %key, cmd = command.name(), "command applied");
        }
        Err(e) => {
            tracing::warn!(session = %key, error = %e, "ignoring malformed command");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use std::time::Duration;

    type ClientStream =
        WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    struct TestServer {
        addr: SocketAddr,
        state: SharedState,
        cancel: CancellationToken,
        _handle: tokio::task::JoinHandle<Result<(), DaemonError>>,
    }

    async fn start_test_server(max_connections: Option<usize>) -> TestServer {
        let cancel = CancellationToken::new();
        let config = DaemonConfig {
            tick_hz: 50,
            aggregate_hz: 50,
            allowed_origins: vec!["https://scoreboard.example.com".into()],
            ..DaemonConfig::default()
        };
        let state = ServiceState::new(config, cancel.clone());
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut server = WsServer::new(addr, Arc::clone(&state), cancel.clone());
        if let Some(max) = max_connections {
            server = server.with_max_connections(max);
        }
        let (listener, local_addr) = server.bind().await.unwrap();
        let handle = tokio::spawn(async move { server.serve(listener).await });
        TestServer {
            addr: local_addr,
            state,
            cancel,
            _handle: handle,
        }
    }

    impl TestServer {
        fn url(&self, path: &str) -> String {
            format!("ws://127.0.0.1:{}{}", self.addr.port(), path)
        }

        async fn connect(&self, path: &str) -> ClientStream {
            let (ws, _) = tokio_tungstenite::connect_async(self.url(path)).await.unwrap();
            ws
        }

        async fn connect_with_origin(
            &self,
            path: &str,
            origin: &str,
        ) -> Result<ClientStream, tokio_tungstenite::tungstenite::Error> {
            let mut req =
                tokio_tungstenite::tungstenite::client::IntoClientRequest::into_client_request(
                    self.url(path),
                )
                .unwrap();
            req.headers_mut().insert("Origin", origin.parse().unwrap());
            let (ws, _) = tokio_tungstenite::connect_async(req).await?;
            Ok(ws)
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    async fn recv_json(ws: &mut ClientStream) -> serde_json::Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timeout waiting for frame")
                .expect("stream ended")
                .expect("read error");
            match msg {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("expected text frame, got {:?}", other),
            }
        }
    }

    /// Read frames until one satisfies `pred`.
    async fn recv_until(
        ws: &mut ClientStream,
        pred: impl Fn(&serde_json::Value) -> bool,
    ) -> serde_json::Value {
        for _ in 0..100 {
            let frame = recv_json(ws).await;
            if pred(&frame) {
                return frame;
            }
        }
        panic!("no matching frame within 100 frames");
    }

    async fn send_cmd(ws: &mut ClientStream, cmd: serde_json::Value) {
        ws.send(Message::Text(cmd.to_string())).await.unwrap();
    }

    // -----------------------------------------------------------------------
    // Unit tests
    // -----------------------------------------------------------------------

    #[test]
    fn route_parse_session_paths() {
        assert_eq!(
            Route::parse("/ws/clock/court-1/"),
            Some(Route::Session("court-1".into()))
        );
        assert_eq!(
            Route::parse("/ws/clock/court_2"),
            Some(Route::Session("court_2".into()))
        );
        assert_eq!(Route::parse("/ws/index/"), Some(Route::Aggregate));
        assert_eq!(Route::parse("/ws/index"), Some(Route::Aggregate));
    }

    #[test]
    fn route_parse_rejects_bad_paths() {
        assert_eq!(Route::parse("/"), None);
        assert_eq!(Route::parse("/ws/clock/"), None);
        assert_eq!(Route::parse("/ws/clock/a/b/"), None);
        assert_eq!(Route::parse("/ws/clock/bad key/"), None);
        assert_eq!(Route::parse("/api/clock/x/state"), None);
    }

    #[test]
    fn route_channels() {
        assert_eq!(
            Route::Session("x".into()).channel(),
            ChannelId::session("x")
        );
        assert_eq!(Route::Aggregate.channel(), ChannelId::Aggregate);
    }

    fn request_with_origin(origin: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri("/ws/clock/a/");
        if let Some(origin) = origin {
            builder = builder.header("origin", origin);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn validate_origin_allows_local_and_absent() {
        for origin in [
            None,
            Some("null"),
            Some("http://localhost:3000"),
            Some("http://127.0.0.1:8000"),
        ] {
            assert!(validate_origin(&request_with_origin(origin), &[]).is_ok());
        }
    }

    #[test]
    fn validate_origin_uses_allow_list() {
        let allowed = vec!["https://scoreboard.example.com".to_string()];
        let req = request_with_origin(Some("https://scoreboard.example.com"));
        assert!(validate_origin(&req, &allowed).is_ok());

        let req = request_with_origin(Some("https://evil.example.com"));
        let err = validate_origin(&req, &allowed).unwrap_err();
        assert_eq!(err.status(), http::StatusCode::FORBIDDEN);
    }

    #[test]
    fn route_request_unknown_path_is_not_found() {
        let req = http::Request::builder().uri("/nope").body(()).unwrap();
        let err = route_request(&req, &[]).unwrap_err();
        assert_eq!(err.status(), http::StatusCode::NOT_FOUND);
    }

    // -----------------------------------------------------------------------
    // Integration tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn connect_sends_immediate_snapshot() {
        let server = start_test_server(None).await;
        let mut ws = server.connect("/ws/clock/court-1/").await;

        let first = recv_json(&mut ws).await;
        assert_eq!(first["type"], "tick");
        assert_eq!(first["remaining_ms"], 24000);
        assert_eq!(first["running"], false);
        assert!(server.state.registry.contains("court-1"));

        // The handler starts the driver right after the snapshot; the next
        // frame is a driver tick.
        let tick = recv_json(&mut ws).await;
        assert_eq!(tick["type"], "tick");
        assert!(server.state.drivers.is_session_running("court-1"));
    }

    #[tokio::test]
    async fn start_command_shows_up_in_ticks() {
        let server = start_test_server(None).await;
        let mut ws = server.connect("/ws/clock/game/").await;
        recv_json(&mut ws).await;

        send_cmd(&mut ws, serde_json::json!({"cmd": "start"})).await;
        let frame = recv_until(&mut ws, |f| f["running"] == true).await;
        assert!(frame["remaining_ms"].as_u64().unwrap() <= 24_000);

        send_cmd(&mut ws, serde_json::json!({"cmd": "stop"})).await;
        let stopped = recv_until(&mut ws, |f| f["running"] == false).await;
        let frozen = stopped["remaining_ms"].as_u64().unwrap();
        let later = recv_json(&mut ws).await;
        assert_eq!(later["remaining_ms"].as_u64().unwrap(), frozen);
    }

    #[tokio::test]
    async fn set_command_resets_to_value() {
        let server = start_test_server(None).await;
        let mut ws = server.connect("/ws/clock/g/").await;
        recv_json(&mut ws).await;

        send_cmd(&mut ws, serde_json::json!({"cmd": "start"})).await;
        send_cmd(&mut ws, serde_json::json!({"cmd": "set", "value": 14000})).await;
        let frame = recv_until(&mut ws, |f| f["remaining_ms"] == 14000).await;
        assert_eq!(frame["running"], false);
    }

    #[tokio::test]
    async fn malformed_commands_are_ignored() {
        let server = start_test_server(None).await;
        let mut ws = server.connect("/ws/clock/g/").await;
        recv_json(&mut ws).await;

        send_cmd(&mut ws, serde_json::json!({"cmd": "set", "value": "abc"})).await;
        send_cmd(&mut ws, serde_json::json!({"cmd": "launch"})).await;
        ws.send(Message::Text("not json".into())).await.unwrap();
        send_cmd(&mut ws, serde_json::json!({"cmd": "set", "value": 9000})).await;

        // Commands are processed in order; once 9000 shows up the garbage
        // before it has been handled without closing the connection.
        let frame = recv_until(&mut ws, |f| f["remaining_ms"] == 9000).await;
        assert_eq!(frame["running"], false);
        let clock = server.state.registry.clock("g");
        assert_eq!(clock.lock().length_ms(), 9000);
    }

    #[tokio::test]
    async fn observers_of_same_session_share_ticks() {
        let server = start_test_server(None).await;
        let mut control = server.connect("/ws/clock/shared/").await;
        let mut display = server.connect("/ws/clock/shared/").await;
        let mut other = server.connect("/ws/clock/elsewhere/").await;
        recv_json(&mut control).await;
        recv_json(&mut display).await;
        recv_json(&mut other).await;

        send_cmd(&mut control, serde_json::json!({"cmd": "set", "value": 5000})).await;
        recv_until(&mut display, |f| f["remaining_ms"] == 5000).await;

        let untouched = recv_json(&mut other).await;
        assert_eq!(untouched["remaining_ms"], 24000);
        assert_eq!(server.state.drivers.active_session_drivers(), 2);
    }

    #[tokio::test]
    async fn concurrent_connects_share_one_driver() {
        let server = start_test_server(None).await;
        let mut joins = Vec::new();
        for _ in 0..16 {
            let url = server.url("/ws/clock/rush/");
            joins.push(tokio::spawn(async move {
                let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
                // Snapshot, then a driver tick: the handler has called
                // `ensure_session` by the time the second frame arrives.
                recv_json(&mut ws).await;
                recv_json(&mut ws).await;
                ws
            }));
        }
        let mut clients = Vec::new();
        for join in joins {
            clients.push(join.await.unwrap());
        }

        assert_eq!(server.state.drivers.active_session_drivers(), 1);
        assert_eq!(server.state.hub.audience(&ChannelId::session("rush")), 16);
    }

    #[tokio::test]
    async fn disconnect_leaves_audience_and_driver_keeps_running() {
        let server = start_test_server(None).await;
        let mut ws = server.connect("/ws/clock/bye/").await;
        recv_json(&mut ws).await;
        assert_eq!(server.state.hub.audience(&ChannelId::session("bye")), 1);

        ws.close(None).await.unwrap();
        drop(ws);

        let gone = tokio::time::timeout(Duration::from_secs(2), async {
            while server.state.hub.audience(&ChannelId::session("bye")) > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(gone.is_ok());
        assert!(server.state.drivers.is_session_running("bye"));
    }

    #[tokio::test]
    async fn aggregate_observer_gets_sorted_clocks() {
        let server = start_test_server(None).await;
        let now = Instant::now();
        server.state.registry.apply("B", Command::Set(Some(5_000)), now);
        server.state.registry.clock("A");

        let mut ws = server.connect("/ws/index/").await;
        let first = recv_json(&mut ws).await;
        assert_eq!(first["type"], "clocks");
        assert_eq!(first["count"], 2);
        assert_eq!(first["active_clocks"][0]["game_id"], "A");
        assert_eq!(first["active_clocks"][1]["game_id"], "B");
        assert_eq!(first["active_clocks"][1]["time_display"], "00:05.0");
        recv_json(&mut ws).await;
        assert!(server.state.drivers.is_aggregate_running());

        // A new session shows up on a later aggregate tick.
        server.state.registry.clock("C");
        recv_until(&mut ws, |f| f["count"] == 3).await;

        // Commands on the aggregate channel are ignored.
        send_cmd(&mut ws, serde_json::json!({"cmd": "start"})).await;
        let frame = recv_json(&mut ws).await;
        assert_eq!(frame["type"], "clocks");
    }

    #[tokio::test]
    async fn unknown_path_rejected() {
        let server = start_test_server(None).await;
        let result = tokio_tungstenite::connect_async(server.url("/ws/nothing/")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn origin_allow_list_enforced() {
        let server = start_test_server(None).await;
        assert!(
            server
                .connect_with_origin("/ws/clock/a/", "https://scoreboard.example.com")
                .await
                .is_ok()
        );
        assert!(
            server
                .connect_with_origin("/ws/clock/a/", "https://evil.example.com")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let server = start_test_server(None).await;
        let mut ws = server.connect("/ws/clock/p/").await;
        recv_json(&mut ws).await;
        ws.send(Message::Ping(b"hi".to_vec())).await.unwrap();

        let pong = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Pong(data))) => return data,
                    Some(Ok(_)) => continue,
                    other => panic!("unexpected: {:?}", other),
                }
            }
        })
        .await
        .expect("pong within timeout");
        assert_eq!(pong, b"hi".to_vec());
    }

    #[tokio::test]
    async fn connection_limit_enforced() {
        let server = start_test_server(Some(2)).await;

        let _ws1 = server.connect("/ws/clock/a/").await;
        let _ws2 = server.connect("/ws/clock/a/").await;

        // The server drops the TCP stream past the limit, so the handshake
        // (or the first read) fails.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = tokio::time::timeout(Duration::from_secs(2), async {
            tokio_tungstenite::connect_async(server.url("/ws/clock/a/")).await
        })
        .await;

        match result {
            Ok(Ok((mut ws, _))) => {
                let next = ws.next().await;
                assert!(
                    next.is_none() || next.unwrap().is_err(),
                    "third connection should not be fully functional"
                );
            }
            Ok(Err(_)) => {}
            Err(_) => {}
        }
    }
}
