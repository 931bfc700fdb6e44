//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! newline-delimited JSON-RPC calls to the command handlers. Each request
//! runs in its own task so a pending `connect` drain can observe the
//! `ack` calls that arrive on the same socket. Responses and `message`
//! notifications share one outbound queue per socket.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixListener;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use herald_delivery::DeliveryError;
use herald_types::ConnectionId;

use crate::commands;
use crate::session::Session;
use crate::DaemonState;

/// Outbound frames buffered per socket.
const OUTBOUND_CAPACITY: usize = 256;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Server-initiated JSON-RPC notification (no id).
#[derive(Debug, Serialize)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: serde_json::Value,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    pub code: i32,
    /// Error name.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcNotification {
    pub fn new<T: Serialize>(method: &str, params: &T) -> serde_json::Result<Self> {
        Ok(Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: serde_json::to_value(params)?,
        })
    }

    /// Serialize as one newline-terminated frame.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

impl RpcError {
    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "PARSE_ERROR".to_string(),
            data: None,
        }
    }

    /// Invalid request (-32600).
    pub fn invalid_request(detail: &str) -> Self {
        Self {
            code: -32600,
            message: "INVALID_REQUEST".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: "METHOD_NOT_FOUND".to_string(),
            data: Some(serde_json::json!({"method": method})),
        }
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self {
            code: -32602,
            message: "INVALID_PARAMS".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self {
            code: -32603,
            message: "INTERNAL_ERROR".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Store temporarily unavailable (-32020). Retry with the same
    /// `client_message_id`.
    pub fn transient_store(detail: &str) -> Self {
        Self {
            code: -32020,
            message: "TRANSIENT_STORE_ERROR".to_string(),
            data: Some(serde_json::json!({"detail": detail, "retryable": true})),
        }
    }

    /// Invalid pagination cursor (-32021). Retry without a cursor.
    pub fn invalid_cursor(detail: &str) -> Self {
        Self {
            code: -32021,
            message: "INVALID_CURSOR".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Presence directory unreachable (-32022).
    pub fn presence_unavailable(detail: &str) -> Self {
        Self {
            code: -32022,
            message: "PRESENCE_UNAVAILABLE".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Session superseded or expired (-32023). Reconnect.
    pub fn lease_lost(connection_id: ConnectionId) -> Self {
        Self {
            code: -32023,
            message: "LEASE_LOST".to_string(),
            data: Some(serde_json::json!({"connection_id": connection_id})),
        }
    }

    /// Backlog drain failed (-32024).
    pub fn sync_failed(detail: &str) -> Self {
        Self {
            code: -32024,
            message: "SYNC_FAILED".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Method needs a prior `connect` on this socket (-32025).
    pub fn not_connected() -> Self {
        Self {
            code: -32025,
            message: "NOT_CONNECTED".to_string(),
            data: None,
        }
    }
}

impl From<DeliveryError> for RpcError {
    fn from(e: DeliveryError) -> Self {
        let detail = e.to_string();
        match e {
            DeliveryError::TransientStore(_) => RpcError::transient_store(&detail),
            DeliveryError::InvalidCursor(_) => RpcError::invalid_cursor(&detail),
            DeliveryError::Validation(_) => RpcError::invalid_params(&detail),
            DeliveryError::PresenceUnavailable(_) => RpcError::presence_unavailable(&detail),
            DeliveryError::LeaseLost(id) => RpcError::lease_lost(id),
            DeliveryError::AckTimeout(_)
            | DeliveryError::AckStalled { .. }
            | DeliveryError::Connection(_) => RpcError::sync_failed(&detail),
            DeliveryError::Store(_)
            | DeliveryError::Internal(_)
            | DeliveryError::SyncIterationBoundExceeded { .. } => {
                RpcError::internal_error(&detail)
            }
        }
    }
}

/// Per-socket state shared by that socket's request tasks.
pub struct ClientContext {
    pub connection_id: ConnectionId,
    pub outbound: mpsc::Sender<String>,
    /// Set by `connect`, cleared by `disconnect` or socket close.
    pub session: Mutex<Option<Arc<Session>>>,
}

impl ClientContext {
    pub fn new(connection_id: ConnectionId, outbound: mpsc::Sender<String>) -> Self {
        Self {
            connection_id,
            outbound,
            session: Mutex::new(None),
        }
    }

    /// The connected session, or `NOT_CONNECTED`.
    pub async fn session(&self) -> Result<Arc<Session>, RpcError> {
        self.session
            .lock()
            .await
            .clone()
            .ok_or_else(RpcError::not_connected)
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, writer) = stream.into_split();
    let (outbound, frames) = mpsc::channel(OUTBOUND_CAPACITY);
    let writer_task = tokio::spawn(write_frames(writer, frames));

    let ctx = Arc::new(ClientContext::new(state.next_connection_id(), outbound));
    debug!(connection = ctx.connection_id, "client connected");

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let result = loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break Ok(()), // EOF
            Ok(_) => {}
            Err(e) => break Err(e.into()),
        }
        if line.trim().is_empty() {
            continue;
        }

        let parsed = serde_json::from_str::<RpcRequest>(&line);
        let state = state.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let response = match parsed {
                Ok(request) => dispatch_request(&state, &ctx, request).await,
                Err(_) => RpcResponse::error(serde_json::Value::Null, RpcError::parse_error()),
            };
            match serde_json::to_string(&response) {
                Ok(mut json) => {
                    json.push('\n');
                    // Fails only once the socket is gone.
                    let _ = ctx.outbound.send(json).await;
                }
                Err(e) => error!("Response serialization failed: {}", e),
            }
        });
    };

    commands::session::close(&state, &ctx).await;
    debug!(connection = ctx.connection_id, "client disconnected");
    writer_task.abort();
    result
}

async fn write_frames(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::Receiver<String>,
) -> anyhow::Result<()> {
    while let Some(frame) = frames.recv().await {
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
pub async fn dispatch_request(
    state: &Arc<DaemonState>,
    ctx: &Arc<ClientContext>,
    request: RpcRequest,
) -> RpcResponse {
    let id = request.id.clone();
    let method = request.method.as_str();

    if request.jsonrpc != "2.0" {
        return RpcResponse::error(id, RpcError::invalid_request("jsonrpc must be \"2.0\""));
    }

    debug!(connection = ctx.connection_id, "Dispatching RPC method: {}", method);

    let result = match method {
        // Request/response ingress
        "send_message" => commands::messages::send_message(state, &request.params).await,
        "get_page" => commands::messages::get_page(state, &request.params).await,
        "mark_read" => commands::messages::mark_read(state, &request.params).await,
        "delete_message" => commands::messages::delete_message(state, &request.params).await,

        // Live session
        "connect" => commands::session::connect(state, ctx, &request.params).await,
        "ack" => commands::session::ack(ctx, &request.params).await,
        "heartbeat" => commands::session::heartbeat(state, ctx).await,
        "poll" => commands::session::poll(state, ctx).await,
        "disconnect" => commands::session::disconnect(state, ctx).await,
        "get_presence" => commands::session::get_presence(state, &request.params).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}
