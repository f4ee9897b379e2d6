//! Connection handlers for the parley server.
//!
//! This module wires the relay dispatcher to the outside world: the
//! WebSocket endpoint for chat traffic and the HTTP query surface for
//! history and presence.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use bytes::BytesMut;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use parley_core::{
    BroadcastGateway, ChatEvent, DispatchError, DispatcherConfig, RelayDispatcher, SessionTable,
};
use parley_protocol::{codec, Frame, PROTOCOL_VERSION};
use parley_store::SqliteStore;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The relay dispatcher.
    pub dispatcher: RelayDispatcher<SqliteStore, BroadcastGateway>,
    /// The in-process delivery gateway (for subscriptions).
    pub gateway: Arc<BroadcastGateway>,
    /// Connection-to-user bindings.
    pub sessions: SessionTable,
    /// Server configuration.
    pub config: Config,
    active_connections: AtomicUsize,
}

impl AppState {
    /// Create new app state around an opened message store.
    #[must_use]
    pub fn new(config: Config, store: SqliteStore) -> Self {
        let gateway = Arc::new(BroadcastGateway::new());
        let dispatcher_config = DispatcherConfig {
            history_limit: config.storage.history_limit,
            persist_timeout: Duration::from_millis(config.storage.persist_timeout_ms),
            ..DispatcherConfig::default()
        };

        Self {
            dispatcher: RelayDispatcher::with_config(
                Arc::new(store),
                Arc::clone(&gateway),
                dispatcher_config,
            ),
            gateway,
            sessions: SessionTable::new(),
            config,
            active_connections: AtomicUsize::new(0),
        }
    }

    fn try_acquire_slot(&self) -> bool {
        self.active_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.config.limits.max_connections).then_some(n + 1)
            })
            .is_ok()
    }

    fn release_slot(&self) {
        self.active_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Releases the connection slot on drop.
struct SlotGuard {
    state: Arc<AppState>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.state.release_slot();
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the server fails to
/// start.
pub async fn run_server(config: Config) -> Result<()> {
    // The store path may point into a directory that does not exist yet.
    if let Some(parent) = Path::new(&config.storage.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create storage directory {parent:?}"))?;
        }
    }

    let store = SqliteStore::open(&config.storage.path)?;
    let state = Arc::new(AppState::new(config.clone(), store));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.websocket_path, get(ws_handler))
        .route("/messages", get(history_handler))
        .route("/messages/users", get(active_users_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Parley server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, config.websocket_path);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// `GET /messages` - recent history, ascending by timestamp.
async fn history_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    metrics::record_history_request();

    match state.dispatcher.history().await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => {
            error!(error = %e, "History query failed");
            metrics::record_error("store");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "message store unavailable"})),
            )
                .into_response()
        }
    }
}

/// `GET /messages/users` - current presence snapshot.
async fn active_users_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.dispatcher.active_users())
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if !state.try_acquire_slot() {
        warn!("Connection limit reached; refusing upgrade");
        metrics::record_error("connection_limit");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    ws.on_upgrade(move |socket| handle_websocket(socket, state))
        .into_response()
}

/// Per-connection relay state.
struct ConnectionState {
    /// Username this connection joined as, once subscribed.
    username: Option<String>,
    /// Forwarder tasks pumping gateway deliveries into the outbound queue.
    forwarders: Vec<tokio::task::JoinHandle<()>>,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            username: None,
            forwarders: Vec::new(),
        }
    }

    fn abort_forwarders(&mut self) {
        for handle in self.forwarders.drain(..) {
            handle.abort();
        }
    }
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _slot = SlotGuard {
        state: Arc::clone(&state),
    };
    let _metrics_guard = ConnectionMetricsGuard::new();

    // Generate connection ID
    let connection_id = format!(
        "conn_{:x}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    );

    debug!(connection = %connection_id, "WebSocket connected");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Send Connected frame
    let connected = Frame::connected(
        &connection_id,
        PROTOCOL_VERSION.major,
        state.config.heartbeat.interval_ms as u32,
    );
    if send_frame(&mut sender, &connected).await.is_err() {
        error!(connection = %connection_id, "Failed to send Connected frame");
        return;
    }

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Merged outbound queue fed by the forwarder tasks
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();

    let mut conn = ConnectionState::new();

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Deliveries from subscribed topics and the private queue
            Some(frame) = out_rx.recv() => {
                if send_frame(&mut sender, &frame).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > state.config.limits.max_message_size {
                            warn!(connection = %connection_id, size = data.len(), "Oversize message");
                            metrics::record_error("oversize");
                            break;
                        }

                        let start = Instant::now();
                        read_buffer.extend_from_slice(&data);

                        if !drain_frames(
                            &mut read_buffer,
                            &connection_id,
                            &state,
                            &mut sender,
                            &mut conn,
                            &out_tx,
                        ).await {
                            break;
                        }

                        metrics::record_dispatch_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        read_buffer.extend_from_slice(text.as_bytes());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: stop delivery forwarders
    conn.abort_forwarders();

    finalize_connection(&state, &connection_id).await;

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Implicit departure: the socket closed while the session was still
/// bound, so the user never sent an explicit Leave.
async fn finalize_connection(state: &Arc<AppState>, connection_id: &str) {
    let Some(username) = state.sessions.username_of(connection_id) else {
        return;
    };

    state.gateway.deregister_private_queue(&username);
    match state
        .dispatcher
        .leave(&state.sessions, connection_id, &username)
        .await
    {
        Ok(_) => metrics::record_message("LEAVE"),
        Err(e) => warn!(connection = %connection_id, error = %e, "Implicit leave failed"),
    }
    metrics::set_presence_size(state.dispatcher.presence().len());
}

/// Decode and handle every complete frame in the buffer.
///
/// Returns `false` if the connection should be torn down.
async fn drain_frames(
    read_buffer: &mut BytesMut,
    connection_id: &str,
    state: &Arc<AppState>,
    sender: &mut SplitSink<WebSocket, Message>,
    conn: &mut ConnectionState,
    out_tx: &mpsc::UnboundedSender<Frame>,
) -> bool {
    loop {
        match codec::decode_stream(read_buffer) {
            Ok(Some(frame)) => {
                if let Err(e) =
                    handle_frame(&frame, connection_id, state, sender, conn, out_tx).await
                {
                    error!(connection = %connection_id, error = %e, "Frame handling error");
                    return false;
                }
            }
            Ok(None) => return true,
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Protocol error");
                metrics::record_error("protocol");
                return false;
            }
        }
    }
}

/// Handle a decoded frame.
async fn handle_frame(
    frame: &Frame,
    connection_id: &str,
    state: &Arc<AppState>,
    sender: &mut SplitSink<WebSocket, Message>,
    conn: &mut ConnectionState,
    out_tx: &mpsc::UnboundedSender<Frame>,
) -> Result<()> {
    match frame {
        Frame::Join { id, username } => {
            debug!(connection = %connection_id, user = %username, "Join request");

            match state
                .dispatcher
                .join(&state.sessions, connection_id, username)
                .await
            {
                Ok(_) => {
                    metrics::record_message("JOIN");
                    metrics::set_presence_size(state.dispatcher.presence().len());

                    if conn.username.as_deref() != Some(username.as_str()) {
                        // Re-join under a different name: drop the old
                        // subscriptions before wiring up the new ones.
                        conn.abort_forwarders();
                        if let Some(old) = conn.username.take() {
                            state.gateway.deregister_private_queue(&old);
                        }
                        subscribe(state, conn, username, out_tx);
                    }

                    send_frame(sender, &Frame::ack(*id)).await?;
                }
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "Join rejected");
                    metrics::record_rejection(rejection_reason(e));
                }
            }
        }

        Frame::Leave { id, username } => {
            debug!(connection = %connection_id, user = %username, "Leave request");

            match state
                .dispatcher
                .leave(&state.sessions, connection_id, username)
                .await
            {
                Ok(_) => {
                    metrics::record_message("LEAVE");
                    metrics::set_presence_size(state.dispatcher.presence().len());

                    state.gateway.deregister_private_queue(username);
                    conn.abort_forwarders();
                    conn.username = None;

                    send_frame(sender, &Frame::ack(*id)).await?;
                }
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "Leave rejected");
                    metrics::record_rejection(rejection_reason(e));
                }
            }
        }

        Frame::Send {
            id,
            sender: from,
            content,
        } => {
            match state.dispatcher.broadcast(from, content.clone()).await {
                Ok(_) => {
                    metrics::record_message("BROADCAST");
                    if let Some(req_id) = id {
                        send_frame(sender, &Frame::ack(*req_id)).await?;
                    }
                }
                // Fire-and-forget: the sender gets no error signal.
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "Broadcast rejected");
                    metrics::record_rejection(rejection_reason(e));
                }
            }
        }

        Frame::PrivateSend {
            id,
            sender: from,
            recipient,
            content,
        } => {
            match state
                .dispatcher
                .private(from, recipient, content.clone())
                .await
            {
                Ok(_) => {
                    metrics::record_message("PRIVATE");
                    if let Some(req_id) = id {
                        send_frame(sender, &Frame::ack(*req_id)).await?;
                    }
                }
                // Fire-and-forget: the sender gets no error signal.
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "Private send rejected");
                    metrics::record_rejection(rejection_reason(e));
                }
            }
        }

        Frame::Ping { timestamp } => {
            send_frame(sender, &Frame::pong(*timestamp)).await?;
        }

        Frame::Pong { .. } => {
            // Keepalive only
        }

        Frame::Connect { version, token } => {
            debug!(
                connection = %connection_id,
                version = version,
                has_token = token.is_some(),
                "Connect frame (already connected)"
            );
        }

        _ => {
            warn!(connection = %connection_id, frame_type = ?frame.frame_type(), "Unexpected frame type");
        }
    }

    Ok(())
}

/// Wire a joined connection into the gateway: public topic, presence
/// topic, and the user's private queue, each pumped into the outbound
/// queue by its own forwarder task.
fn subscribe(
    state: &Arc<AppState>,
    conn: &mut ConnectionState,
    username: &str,
    out_tx: &mpsc::UnboundedSender<Frame>,
) {
    let mut public_rx = state.gateway.subscribe_public();
    let tx = out_tx.clone();
    conn.forwarders.push(tokio::spawn(async move {
        loop {
            match public_rx.recv().await {
                Ok(event) => {
                    if tx.send(event_frame(&event)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    }));

    let mut presence_rx = state.gateway.subscribe_presence();
    let tx = out_tx.clone();
    conn.forwarders.push(tokio::spawn(async move {
        loop {
            match presence_rx.recv().await {
                Ok(users) => {
                    if tx.send(Frame::presence_update(users.as_ref().clone())).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    }));

    let mut private_rx = state.gateway.register_private_queue(username);
    let tx = out_tx.clone();
    conn.forwarders.push(tokio::spawn(async move {
        while let Some(event) = private_rx.recv().await {
            if tx.send(event_frame(&event)).is_err() {
                break;
            }
        }
    }));

    conn.username = Some(username.to_string());
}

/// Convert a relay event into its delivery frame.
fn event_frame(event: &ChatEvent) -> Frame {
    Frame::Event {
        kind: event.kind,
        sender: event.sender.clone(),
        content: event.content.clone(),
        recipient: event.recipient.clone(),
        timestamp: event.timestamp,
    }
}

fn rejection_reason(error: DispatchError) -> &'static str {
    match error {
        DispatchError::EmptySender => "empty_sender",
        DispatchError::EmptyRecipient => "empty_recipient",
    }
}

/// Send a frame to the WebSocket.
async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> Result<()> {
    let data = codec::encode(frame)?;
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}
