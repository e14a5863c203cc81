//! HTTP and WebSocket surface using Axum.
//!
//! Both transports decode a [`Request`], hand it to the [`Worker`] and write
//! back the [`Response`]. WebSocket messages are dispatched on their own
//! tasks so a slow command never blocks the socket.

use crate::dispatch::Worker;
use crate::error::Result;
use crate::flags::FlagStore;
use crate::model::Model;
use crate::push::PushManager;
use crate::registry::{Connection, ConnectionRegistry, CONNECTION_CHANNEL_BUFFER_SIZE};
use crate::reports::{self, Reporter};
use axum::{
    body::{to_bytes, Body},
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Request as HttpRequest, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response as HttpResponse},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use common::{ErrorCode, Request, Response};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde_json::json;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

/// Largest accepted HTTP request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;
/// Interval of server pings on idle sockets.
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Sockets silent for this long are closed.
const STALE_AFTER: Duration = Duration::from_secs(90);

const HEARTBEAT_PREFIX: &str = "PING!";
const HEADER_APP_ID: &str = "x-app-id";
const HEADER_APP_TOKEN: &str = "x-app-token";

/// Shared application state.
pub struct AppState {
    pub worker: Arc<Worker>,
    pub registry: Arc<ConnectionRegistry>,
    pub push: Arc<PushManager>,
    pub model: Arc<dyn Model>,
    pub flags: Arc<FlagStore>,
    pub reporter: Arc<Reporter>,
    pub request_timeout: Duration,
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(api_handler).post(api_handler))
        .route("/api", get(api_handler).post(api_handler))
        .route("/api/check_auth", get(check_auth_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

// =============================================================================
// Wire helpers
// =============================================================================

/// Reply to a `PING!<token>` heartbeat, if `text` is one.
pub fn heartbeat_reply(text: &str) -> Option<String> {
    text.strip_prefix(HEARTBEAT_PREFIX)
        .map(|token| format!("PONG!{}", token))
}

/// Serialize a reply, gzip-compressed when `compressed` is set.
pub fn encode_reply(response: &Response, compressed: bool) -> Result<Vec<u8>> {
    let json = response.to_json()?;
    if !compressed {
        return Ok(json.into_bytes());
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(json.as_bytes())?;
    Ok(encoder.finish()?)
}

/// Run a request under `timeout`. When the deadline passes the caller gets a
/// `Timeout` reply right away and the finished response, marked late, is
/// handed to `on_late`.
pub async fn execute_with_timeout<F>(
    worker: Arc<Worker>,
    request: Request,
    timeout: Duration,
    on_late: F,
) -> Response
where
    F: FnOnce(Response) + Send + 'static,
{
    let request_id = request.request_id.clone();
    let command = request.command.clone();
    let mut task = tokio::spawn(async move { worker.execute(&request).await });

    let outcome = tokio::time::timeout(timeout, &mut task).await;
    match outcome {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            error!("Dispatch task for {} failed: {:?}", command, e);
            let mut response = Response::new(request_id);
            response.error(ErrorCode::Unknown, &[]);
            response
        }
        Err(_) => {
            warn!("Command {} exceeded {:?}", command, timeout);
            tokio::spawn(async move {
                if let Ok(mut late) = task.await {
                    late.mark_late();
                    on_late(late);
                }
            });
            let mut response = Response::new(request_id);
            response.timeout();
            response
        }
    }
}

fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_default()
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

// =============================================================================
// HTTP
// =============================================================================

fn http_reply(response: &Response, compressed: bool) -> HttpResponse {
    match encode_reply(response, compressed) {
        Ok(body) => {
            let mut reply = (StatusCode::OK, Body::from(body)).into_response();
            let headers = reply.headers_mut();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            if compressed {
                headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            }
            reply
        }
        Err(e) => {
            error!("Failed to encode reply: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `GET|POST /` and `/api`: one command per request body.
async fn api_handler(State(state): State<Arc<AppState>>, req: HttpRequest) -> HttpResponse {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let headers = req.headers().clone();
    let body = match to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            debug!("Failed to read request body: {}", e);
            return http_reply(&Response::invalid_json(), false);
        }
    };

    let mut request = match Request::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!("Rejected request body: {}", e);
            return http_reply(&Response::invalid_json(), false);
        }
    };
    request.client_ip = client_ip(&headers, peer);
    request.user_agent = user_agent(&headers);
    request.websocket_id = None;

    let compressed = request.compressed;
    let command = request.command.clone();
    let response = execute_with_timeout(
        state.worker.clone(),
        request,
        state.request_timeout,
        move |_| debug!("Late reply for {} dropped, HTTP caller is gone", command),
    )
    .await;
    http_reply(&response, compressed)
}

/// `GET /api/check_auth`: resolve an app token header pair to its account.
async fn check_auth_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> HttpResponse {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    let app_id = header_value(HEADER_APP_ID);
    let token = header_value(HEADER_APP_TOKEN);
    if app_id.is_empty() || token.is_empty() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let grant = match state.model.verify_app_token(&app_id, &token).await {
        Ok(Some(grant)) => grant,
        Ok(None) => return StatusCode::FORBIDDEN.into_response(),
        Err(e) => {
            warn!("App token verification failed: {:?}", e);
            return StatusCode::FORBIDDEN.into_response();
        }
    };
    match state.model.get_account(&grant.account_id).await {
        Ok(Some(account)) => Json(json!({
            "account_id": account.id,
            "name": account.name,
        }))
        .into_response(),
        Ok(None) => StatusCode::FORBIDDEN.into_response(),
        Err(e) => {
            warn!("Failed to load account {}: {:?}", grant.account_id, e);
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "bundle_id": state.registry.bundle_id(),
        "connections": state.registry.connection_count(),
        "bound_connections": state.registry.bound_count(),
        "flags": *state.flags.load(),
    }))
}

// =============================================================================
// WebSocket
// =============================================================================

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let ip = client_ip(&headers, Some(peer));
    let agent = user_agent(&headers);
    ws.on_upgrade(move |socket| handle_socket(socket, state, ip, agent))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, ip: String, agent: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(CONNECTION_CHANNEL_BUFFER_SIZE);

    let connection = Arc::new(Connection::new(tx));
    let websocket_id = state.registry.register(connection.clone());

    counter!("gateway_connections_total").increment(1);
    gauge!("gateway_active_connections").set(state.registry.connection_count() as f64);
    state.reporter.incr(reports::WS_CONNECTS);
    info!("Websocket {} connected from {}", websocket_id, ip);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut ping_interval = interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        connection.touch();
                        if let Err(e) = handle_message(&state, &connection, &ip, &agent, msg) {
                            warn!("Error handling message from {}: {:?}", websocket_id, e);
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {:?}", websocket_id, e);
                        break;
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                let idle_ms = Utc::now().timestamp_millis() - connection.last_seen_time();
                if idle_ms > STALE_AFTER.as_millis() as i64 {
                    warn!("Websocket {} idle for {}ms, closing", websocket_id, idle_ms);
                    break;
                }
                if connection.tx.try_send(Message::Ping(Vec::new().into())).is_err() {
                    break;
                }
            }
        }
    }

    if let Some(removed) = state.registry.unregister(&websocket_id) {
        if removed.binding().is_some() {
            state
                .push
                .unregister_websocket(&websocket_id, state.registry.bundle_id());
        }
    }
    send_task.abort();

    counter!("gateway_disconnections_total").increment(1);
    gauge!("gateway_active_connections").set(state.registry.connection_count() as f64);
    state.reporter.incr(reports::WS_DISCONNECTS);
    info!("Websocket {} disconnected", websocket_id);
}

/// Handle a single WebSocket message.
fn handle_message(
    state: &Arc<AppState>,
    connection: &Arc<Connection>,
    ip: &str,
    agent: &str,
    msg: Message,
) -> Result<()> {
    let request = match msg {
        Message::Text(text) => {
            if let Some(pong) = heartbeat_reply(text.as_str()) {
                return connection.send_text(pong);
            }
            Request::from_slice(text.as_str().as_bytes())
        }
        Message::Binary(data) => Request::from_slice(&data),
        Message::Ping(data) => {
            connection.tx.try_send(Message::Pong(data))?;
            return Ok(());
        }
        Message::Pong(_) | Message::Close(_) => return Ok(()),
    };

    let mut request = match request {
        Ok(request) => request,
        Err(e) => {
            debug!("Invalid request on {}: {}", connection.id, e);
            return connection.send_text(Response::invalid_json().to_json()?);
        }
    };
    request.client_ip = ip.to_string();
    request.user_agent = agent.to_string();
    request.websocket_id = Some(connection.id.clone());

    tokio::spawn(dispatch_ws(state.clone(), connection.clone(), request));
    Ok(())
}

async fn dispatch_ws(state: Arc<AppState>, connection: Arc<Connection>, request: Request) {
    let compressed = request.compressed;
    let late_connection = connection.clone();
    let response = execute_with_timeout(
        state.worker.clone(),
        request,
        state.request_timeout,
        move |late| {
            if let Err(e) = send_reply(&late_connection, &late, compressed) {
                debug!("Failed to send late reply to {}: {:?}", late_connection.id, e);
            }
        },
    )
    .await;

    if let Err(e) = send_reply(&connection, &response, compressed) {
        debug!("Failed to send reply to {}: {:?}", connection.id, e);
    }
}

fn send_reply(connection: &Connection, response: &Response, compressed: bool) -> Result<()> {
    let bytes = encode_reply(response, compressed)?;
    if compressed {
        connection.send_binary(bytes)
    } else {
        connection.send_text(String::from_utf8_lossy(&bytes).into_owned())
    }
}
