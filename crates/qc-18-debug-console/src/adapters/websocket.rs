//! # Console Socket Server
//!
//! HTTP server exposing the console remotely:
//!
//! - `GET /console` upgrades to a websocket carrying one console session
//! - `GET /test` returns `ok`
//! - `GET /status` returns the connectivity summary
//! - `GET /peer/self` returns the node's peer ID and node ID
//!
//! Every route requires the api key when one is configured.
//!
//! ## Bridging
//!
//! Inbound text messages are appended to the session's [`InputBuffer`]
//! (a missing line terminator is added). The session writes into a
//! [`BufferWriter`] that a separate forwarder task drains into frames. The
//! forwarder never blocks without bound: a stalled write is retried with
//! backoff a fixed number of times and then the connection is dropped.

use crate::domain::{BufferWriter, OutputSink, ServerError, SocketConfig};
use crate::ports::NetworkBackend;
use crate::service::{DebugConsole, InputBuffer, SessionEnd, SessionKind};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Attempts per frame before a stalled socket is given up.
const WRITE_ATTEMPTS: u32 = 3;

/// Pause after the first stalled attempt; doubles on each retry.
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Peers needed before the node reports itself connected.
const CONNECTED_PEER_THRESHOLD: usize = 2;

#[derive(Clone)]
struct ServerState {
    console: Arc<DebugConsole>,
    config: SocketConfig,
}

/// The `/console` socket server.
pub struct ConsoleServer {
    state: ServerState,
}

impl ConsoleServer {
    pub fn new(console: Arc<DebugConsole>) -> Self {
        let config = console.config().socket.clone();
        Self {
            state: ServerState { console, config },
        }
    }

    /// All routes behind the api key check.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/console", get(console_upgrade))
            .route("/test", get(|| async { "ok" }))
            .route("/status", get(status))
            .route("/peer/self", get(peer_self))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                require_api_key,
            ))
            .with_state(self.state.clone())
    }

    pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
        TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Serves on `listener` until the console shuts down.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        info!(%addr, auth = self.state.config.api_key.is_some(), "Console socket listening");

        let shutdown = self.state.console.cancel_token().clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!(%addr, "Console socket stopped");
        Ok(())
    }

    /// Binds the configured address and serves.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = Self::bind(self.state.config.listen).await?;
        self.serve(listener).await
    }
}

impl fmt::Debug for ConsoleServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleServer")
            .field("listen", &self.state.config.listen)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Routes
// =============================================================================

#[derive(Debug, Serialize)]
struct StatusResponse {
    /// 0 = Ok.
    status: u8,
    isconnected: bool,
    countpeerlist: usize,
    countnetwork: usize,
}

#[derive(Debug, Serialize)]
struct PeerSelfResponse {
    peerid: String,
    nodeid: String,
}

async fn status(State(state): State<ServerState>) -> Json<StatusResponse> {
    let peers = state.console.backend().list_peers().len();
    Json(StatusResponse {
        status: 0,
        isconnected: peers >= CONNECTED_PEER_THRESHOLD,
        countpeerlist: peers,
        // Only the local peer list is known.
        countnetwork: peers,
    })
}

async fn peer_self(State(state): State<ServerState>) -> Json<PeerSelfResponse> {
    let key_pair = state.console.backend().key_pair();
    Json(PeerSelfResponse {
        peerid: key_pair.public_key().to_hex(),
        nodeid: key_pair.node_id().to_hex(),
    })
}

async fn console_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| ConsoleConnection::new(state).handle(socket))
}

// =============================================================================
// Authentication
// =============================================================================

async fn require_api_key(State(state): State<ServerState>, request: Request, next: Next) -> Response {
    if check_api_key(&request, state.config.api_key.as_deref()) {
        return next.run(request).await;
    }
    warn!(path = %request.uri().path(), "Rejected request without valid api key");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        Json(serde_json::json!({ "error": "invalid or missing api key" })),
    )
        .into_response()
}

/// Accepts `Authorization: Bearer`, `x-api-key` or the `apikey` query
/// parameter.
fn check_api_key<B>(request: &axum::http::Request<B>, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };

    if let Some(token) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    {
        return constant_time_compare(token, expected);
    }

    if let Some(key) = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
    {
        return constant_time_compare(key, expected);
    }

    let query = Query::<ApiKeyQuery>::try_from_uri(request.uri());
    if let Ok(Query(ApiKeyQuery { apikey: Some(key) })) = query {
        return constant_time_compare(&key, expected);
    }

    false
}

/// The `apikey` query parameter, percent-decoded.
#[derive(Debug, Deserialize)]
struct ApiKeyQuery {
    apikey: Option<String>,
}

/// Compares in time independent of where the inputs differ.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;

    let max_len = a.len().max(b.len());
    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];
    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);
    (lengths_equal & contents_equal).into()
}

// =============================================================================
// Connection
// =============================================================================

/// One upgraded `/console` connection.
struct ConsoleConnection {
    console: Arc<DebugConsole>,
    config: SocketConfig,
    connection_id: Uuid,
}

impl ConsoleConnection {
    fn new(state: ServerState) -> Self {
        Self {
            console: state.console,
            config: state.config,
            connection_id: Uuid::new_v4(),
        }
    }

    /// Returns the notice sent back for an oversized message.
    fn check_message_size(&self, size: usize) -> Option<String> {
        if size <= self.config.max_message_size {
            return None;
        }
        warn!(
            connection_id = %self.connection_id,
            size,
            max = self.config.max_message_size,
            "Message exceeds size limit"
        );
        Some(format!(
            "Message too large: {} bytes (max: {})",
            size, self.config.max_message_size
        ))
    }

    async fn handle(self, socket: WebSocket) {
        info!(connection_id = %self.connection_id, "Console socket connected");

        let (sink, mut stream) = socket.split();
        let input = InputBuffer::new();
        let output = BufferWriter::new();
        let notices = OutputSink::from(output.clone());

        let session = self.console.open_session(
            SessionKind::Socket,
            Box::new(input.reader()),
            OutputSink::from(output.clone()),
        );
        let session_id = session.id();
        let session_token = session.cancel_token().clone();
        debug!(connection_id = %self.connection_id, session_id = %session_id, "Session attached");

        // Cancelled once the session is over or the socket is unusable.
        let closing = CancellationToken::new();

        let forwarder = tokio::spawn(forward_output(
            sink,
            output,
            closing.clone(),
            self.config.clone(),
            self.connection_id,
        ));
        let runner = {
            let console = Arc::clone(&self.console);
            let closing = closing.clone();
            tokio::spawn(async move {
                let end = console.run_session(session).await;
                closing.cancel();
                end
            })
        };

        loop {
            let message = tokio::select! {
                _ = closing.cancelled() => break,
                message = stream.next() => message,
            };
            match message {
                Some(Ok(Message::Text(text))) => match self.check_message_size(text.len()) {
                    Some(notice) => notices.line(notice),
                    None => input.push_message(&text),
                },
                Some(Ok(Message::Binary(data))) => {
                    if let Some(notice) = self.check_message_size(data.len()) {
                        notices.line(notice);
                        continue;
                    }
                    match String::from_utf8(data) {
                        Ok(text) => input.push_message(&text),
                        Err(_) => warn!(
                            connection_id = %self.connection_id,
                            "Dropping binary message that is not UTF-8"
                        ),
                    }
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    debug!(connection_id = %self.connection_id, "Console socket close received");
                    break;
                }
                Some(Err(e)) => {
                    warn!(connection_id = %self.connection_id, error = %e, "Console socket error");
                    break;
                }
            }
        }

        // Nobody is left to read the output of a running command.
        input.close();
        session_token.cancel();

        let end = match runner.await {
            Ok(end) => end,
            Err(e) => {
                warn!(connection_id = %self.connection_id, error = %e, "Session task failed");
                SessionEnd::Cancelled
            }
        };
        closing.cancel();
        if let Err(e) = forwarder.await {
            warn!(connection_id = %self.connection_id, error = %e, "Forwarder task failed");
        }

        info!(
            connection_id = %self.connection_id,
            session_id = %session_id,
            reason = %end,
            "Console socket closed"
        );
    }
}

// =============================================================================
// Output forwarding
// =============================================================================

#[derive(Debug, Error)]
enum ForwardError {
    #[error("socket closed: {0}")]
    Closed(String),

    #[error("socket write stalled after {0} attempts")]
    Stalled(u32),
}

/// Drains `output` into text frames until `closing` fires, then flushes
/// what is left and closes the socket.
async fn forward_output<S>(
    mut sink: S,
    output: Arc<BufferWriter>,
    closing: CancellationToken,
    config: SocketConfig,
    connection_id: Uuid,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    loop {
        let finished = closing.is_cancelled();
        while let Some(chunk) = output.drain_chunk(config.forward_chunk) {
            if let Err(e) = write_frame(&mut sink, chunk, config.write_timeout).await {
                warn!(connection_id = %connection_id, error = %e, "Dropping console socket");
                closing.cancel();
                return;
            }
        }
        if finished {
            break;
        }
        tokio::select! {
            _ = output.wait_for_output(config.forward_interval) => {}
            _ = closing.cancelled() => {}
        }
    }

    let _ = timeout(config.write_timeout, sink.send(Message::Close(None))).await;
}

/// Queues one frame and flushes it. A write that takes longer than
/// `write_timeout` is retried after a growing pause.
async fn write_frame<S>(sink: &mut S, text: String, write_timeout: Duration) -> Result<(), ForwardError>
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let mut queued = false;
    let mut backoff = INITIAL_BACKOFF;

    for attempt in 1..=WRITE_ATTEMPTS {
        if !queued {
            match timeout(write_timeout, sink.feed(Message::Text(text.clone()))).await {
                Ok(Ok(())) => queued = true,
                Ok(Err(e)) => return Err(ForwardError::Closed(e.to_string())),
                Err(_) => {}
            }
        }
        if queued {
            match timeout(write_timeout, sink.flush()).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => return Err(ForwardError::Closed(e.to_string())),
                Err(_) => {}
            }
        }
        if attempt < WRITE_ATTEMPTS {
            debug!(attempt, backoff = ?backoff, "Socket write stalled, retrying");
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }
    Err(ForwardError::Stalled(WRITE_ATTEMPTS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBackend;
    use crate::domain::{ConsoleConfig, ConsoleWriter, KeyPair};
    use axum::body::Body;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tower::ServiceExt;

    fn make_server(api_key: Option<&str>) -> (ConsoleServer, Arc<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new(KeyPair::generate()));
        let mut config = ConsoleConfig::default();
        config.socket.api_key = api_key.map(str::to_string);
        let console = Arc::new(DebugConsole::new(
            backend.clone(),
            config,
            OutputSink::from(BufferWriter::new()),
        ));
        (ConsoleServer::new(console), backend)
    }

    async fn get(router: Router, request: axum::http::Request<Body>) -> (StatusCode, String) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn request(uri: &str) -> axum::http::request::Builder {
        axum::http::Request::builder().uri(uri)
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("secret", "secret"));
        assert!(!constant_time_compare("secret", "Secret"));
        assert!(!constant_time_compare("secret", "secre"));
        assert!(!constant_time_compare("", "secret"));
    }

    #[tokio::test]
    async fn test_open_routes_without_api_key() {
        let (server, _) = make_server(None);
        let (status, body) = get(server.router(), request("/test").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_api_key_sources() {
        let (server, _) = make_server(Some("key-123"));

        let (status, _) = get(server.router(), request("/test").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let bearer = request("/test")
            .header("Authorization", "Bearer key-123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(get(server.router(), bearer).await.0, StatusCode::OK);

        let header = request("/test")
            .header("x-api-key", "key-123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(get(server.router(), header).await.0, StatusCode::OK);

        let query = request("/test?apikey=key-123").body(Body::empty()).unwrap();
        assert_eq!(get(server.router(), query).await.0, StatusCode::OK);

        let wrong = request("/test")
            .header("x-api-key", "key-124")
            .body(Body::empty())
            .unwrap();
        assert_eq!(get(server.router(), wrong).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_query_api_key_is_percent_decoded() {
        let (server, _) = make_server(Some("a+b&c"));

        let encoded = request("/test?x=1&apikey=a%2Bb%26c")
            .body(Body::empty())
            .unwrap();
        assert_eq!(get(server.router(), encoded).await.0, StatusCode::OK);

        let raw = request("/test?apikey=a+b&c").body(Body::empty()).unwrap();
        assert_eq!(get(server.router(), raw).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status_counts_peers() {
        let (server, backend) = make_server(None);
        for seed in 1..=2u8 {
            let public_key = KeyPair::from_secret_bytes(&[seed; 32]).unwrap().public_key();
            backend.add_peer(InMemoryBackend::connected_peer(public_key));
        }

        let (status, body) = get(server.router(), request("/status").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], 0);
        assert_eq!(json["isconnected"], true);
        assert_eq!(json["countpeerlist"], 2);
        assert_eq!(json["countnetwork"], 2);
    }

    #[tokio::test]
    async fn test_peer_self() {
        let (server, backend) = make_server(None);
        let (_, body) = get(server.router(), request("/peer/self").body(Body::empty()).unwrap()).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        let key_pair = backend.key_pair();
        assert_eq!(json["peerid"], key_pair.public_key().to_hex());
        assert_eq!(json["nodeid"], key_pair.node_id().to_hex());
    }

    /// Sink that never becomes ready.
    struct StalledSink;

    impl Sink<Message> for StalledSink {
        type Error = std::io::Error;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _: Message) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_stalled_write_gives_up() {
        let mut sink = StalledSink;
        let result = write_frame(&mut sink, "status".into(), Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ForwardError::Stalled(WRITE_ATTEMPTS))));
    }

    #[tokio::test]
    async fn test_forwarder_flushes_in_chunks_then_closes() {
        let output = BufferWriter::new();
        output.write_text("0123456789");
        let closing = CancellationToken::new();
        closing.cancel();

        let config = SocketConfig {
            forward_chunk: 4,
            ..SocketConfig::default()
        };
        let mut frames: Vec<Message> = Vec::new();
        forward_output(&mut frames, output, closing, config, Uuid::new_v4()).await;

        let texts: Vec<_> = frames
            .iter()
            .filter_map(|frame| match frame {
                Message::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["0123", "4567", "89"]);
        assert!(matches!(frames.last(), Some(Message::Close(None))));
    }

    #[tokio::test]
    async fn test_stalled_forwarder_cancels_connection() {
        let output = BufferWriter::new();
        output.write_text("peer list");
        let closing = CancellationToken::new();
        let config = SocketConfig {
            write_timeout: Duration::from_millis(10),
            ..SocketConfig::default()
        };

        forward_output(StalledSink, output, closing.clone(), config, Uuid::new_v4()).await;
        assert!(closing.is_cancelled());
    }
}
