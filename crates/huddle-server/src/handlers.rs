//! Connection handlers for the huddle server.
//!
//! This module handles the WebSocket connection lifecycle and wires the
//! HTTP routes together.

use crate::api;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{any, delete, get},
    Json, Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use huddle_core::{CloseReason, ConnectionId, ConversationStore, Dispatch, Hub, MemoryStore};
use huddle_protocol::Encoded;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The realtime hub.
    pub hub: Hub,
    /// Conversation and message storage.
    pub store: Arc<dyn ConversationStore>,
    /// Server configuration.
    pub config: Config,
    /// One permit per allowed open WebSocket, taken before the upgrade.
    connection_permits: Arc<Semaphore>,
}

impl AppState {
    /// Create new app state backed by an in-memory store.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    /// Create new app state with the given store.
    #[must_use]
    pub fn with_store(config: Config, store: Arc<dyn ConversationStore>) -> Self {
        let permits = config.limits.max_connections.min(Semaphore::MAX_PERMITS);
        Self {
            hub: Hub::with_config(config.hub_config()),
            store,
            connection_permits: Arc::new(Semaphore::new(permits)),
            config,
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, any(ws_handler))
        .route("/health", get(health_handler))
        .route(
            "/api/messages",
            get(api::list_messages).post(api::send_message),
        )
        .route("/api/messages/:message_id", delete(api::delete_message))
        .with_state(state)
}

/// Serve on an already bound listener until the server fails.
///
/// # Errors
///
/// Returns an error if the server stops with an I/O error.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, app(state))
        .await
        .context("Server error")
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Huddle server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, Arc::new(AppState::new(config))).await
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connections,
        "online_users": stats.online_users,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: Option<WebSocketUpgrade>, State(state): State<Arc<AppState>>) -> Response {
    let Some(ws) = ws else {
        return (StatusCode::UPGRADE_REQUIRED, "Expected websocket").into_response();
    };

    // Released when the connection task ends, or with the closure if the
    // upgrade never completes.
    let Ok(permit) = Arc::clone(&state.connection_permits).try_acquire_owned() else {
        warn!(
            max = state.config.limits.max_connections,
            "Connection limit reached, rejecting upgrade"
        );
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };

    ws.on_upgrade(move |socket| handle_websocket(socket, state, permit))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, _permit: OwnedSemaphorePermit) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (tx, rx) = mpsc::channel::<Encoded>(state.config.limits.outbound_buffer.max(1));
    let connection_id = state.hub.connect(tx);

    debug!(connection = %connection_id, "WebSocket connected");

    let (sender, mut receiver) = socket.split();
    let mut writer = tokio::spawn(write_loop(
        connection_id,
        sender,
        rx,
        state.config.heartbeat_interval(),
    ));

    let idle_timeout = state.config.heartbeat_timeout();
    let mut deadline = tokio::time::Instant::now() + idle_timeout;

    // Message processing loop
    let reason = loop {
        tokio::select! {
            msg = receiver.next() => {
                deadline = tokio::time::Instant::now() + idle_timeout;
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch(&state, connection_id, text.as_bytes());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        dispatch(&state, connection_id, &data);
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // axum answers pings itself
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break CloseReason::Closed;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break CloseReason::Error;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break CloseReason::Closed;
                    }
                }
            }

            _ = &mut writer => {
                debug!(connection = %connection_id, "Writer stopped");
                break CloseReason::Error;
            }

            () = tokio::time::sleep_until(deadline) => {
                warn!(connection = %connection_id, timeout_ms = idle_timeout.as_millis() as u64, "Heartbeat timeout");
                metrics::record_error("heartbeat_timeout");
                break CloseReason::Timeout;
            }
        }
    };

    state.hub.disconnect(connection_id, reason);
    writer.abort();
    metrics::set_online_users(state.hub.stats().online_users);

    debug!(connection = %connection_id, %reason, "WebSocket disconnected");
}

/// Route one inbound payload through the hub and record the outcome.
fn dispatch(state: &AppState, connection_id: ConnectionId, data: &[u8]) {
    let start = Instant::now();

    match state.hub.handle_text(connection_id, data) {
        Dispatch::Identified(identified) => {
            metrics::record_event("inbound", "init", data.len());
            if identified.came_online || identified.released.is_some() {
                metrics::set_online_users(state.hub.stats().online_users);
            }
        }
        Dispatch::Relayed { kind, report } => {
            metrics::record_event("inbound", kind.as_str(), data.len());
            metrics::record_fanout(&report);
        }
        Dispatch::Dropped(reason) => {
            metrics::record_dropped_event(reason.label());
        }
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
}

/// Drain the connection's outbox into the socket and keep it alive with pings.
async fn write_loop(
    connection_id: ConnectionId,
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Encoded>,
    heartbeat: Duration,
) {
    let mut ticker = tokio::time::interval(heartbeat);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            event = rx.recv() => {
                // Outbox is dropped once the hub forgets the connection.
                let Some(event) = event else { break };
                metrics::record_event("outbound", "event", event.len());
                if sender.send(Message::Text(event.as_str().to_owned())).await.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Err(e) = sender.close().await {
        debug!(connection = %connection_id, error = %e, "Close failed");
    }
}
