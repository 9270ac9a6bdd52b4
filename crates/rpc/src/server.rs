// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC server: accepts connections, decodes frames, dispatches JSON-RPC
//! requests to registered method handlers.
//!
//! Requests on one connection are dispatched in arrival order; each handler
//! runs as its own task, so responses may complete out of order and are
//! reunified by request id on the client. Notifications receive no
//! response. Heartbeat frames are echoed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::endpoint::{BoxedReader, BoxedWriter, Endpoint, Listener};
use crate::frame::{
    read_frame, write_frame, Frame, FrameDecoder, FrameKind, TransportError,
    DEFAULT_MAX_MESSAGE_SIZE,
};
use crate::jsonrpc::{RequestId, RpcError, RpcRequest, RpcResponse};
use crate::methods::{ConnId, Methods};

/// Default cap on concurrent client connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Reserved params key carrying the shared auth token.
pub const AUTH_PARAM: &str = "__auth";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub endpoint: Endpoint,
    pub max_connections: usize,
    pub max_message_size: usize,
    pub auth_token: Option<String>,
}

impl ServerConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            auth_token: None,
        }
    }
}

struct Connection {
    tx: mpsc::UnboundedSender<Frame>,
    reader: JoinHandle<()>,
}

struct Shared {
    config: ServerConfig,
    methods: Methods,
    connections: Mutex<HashMap<ConnId, Connection>>,
}

/// A running RPC server. Dropping the handle does not stop it; call
/// [`RpcServer::shutdown`].
pub struct RpcServer {
    shared: Arc<Shared>,
    local_endpoint: Endpoint,
    accept_task: JoinHandle<()>,
}

impl RpcServer {
    /// Bind to the configured endpoint and start accepting connections.
    pub async fn bind(config: ServerConfig, methods: Methods) -> Result<Self, TransportError> {
        let listener = Listener::bind(&config.endpoint).await?;
        let local_endpoint = listener.local_endpoint(&config.endpoint);

        let shared = Arc::new(Shared {
            config,
            methods,
            connections: Mutex::new(HashMap::new()),
        });

        let accept_shared = Arc::clone(&shared);
        let accept_task = tokio::spawn(async move {
            let next_id = AtomicU64::new(1);
            loop {
                match listener.accept().await {
                    Ok((reader, writer)) => {
                        let conn_id = next_id.fetch_add(1, Ordering::Relaxed);
                        accept_connection(&accept_shared, conn_id, reader, writer);
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
        });

        Ok(Self {
            shared,
            local_endpoint,
            accept_task,
        })
    }

    /// The bound endpoint (ephemeral TCP ports resolved).
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local_endpoint
    }

    /// Number of live client connections.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    /// Send a notification frame to every connected client. Per client,
    /// broadcasts are delivered in the order this method was called.
    pub fn broadcast(&self, method: &str, params: Value) {
        let request = RpcRequest::notification(method, params);
        let payload = match serde_json::to_vec(&request) {
            Ok(p) => p,
            Err(e) => {
                error!(method, error = %e, "failed to encode broadcast");
                return;
            }
        };
        let frame = Frame::new(FrameKind::Notification, payload);
        let connections = self.shared.connections.lock();
        for conn in connections.values() {
            let _ = conn.tx.send(frame.clone());
        }
    }

    /// Stop accepting, close every connection, and remove a Unix socket
    /// file. Queued responses are flushed before writers exit.
    pub async fn shutdown(self) {
        self.accept_task.abort();
        let connections: Vec<Connection> = {
            let mut map = self.shared.connections.lock();
            map.drain().map(|(_, c)| c).collect()
        };
        for conn in connections {
            conn.reader.abort();
            // Dropping tx lets the writer drain its queue and exit.
            drop(conn.tx);
        }
        #[cfg(unix)]
        if let Endpoint::Unix(path) = &self.shared.config.endpoint {
            if path.exists() {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

/// Admit (or refuse) a freshly accepted connection and spawn its tasks.
fn accept_connection(
    shared: &Arc<Shared>,
    conn_id: ConnId,
    reader: BoxedReader,
    writer: BoxedWriter,
) {
    {
        let connections = shared.connections.lock();
        if connections.len() >= shared.config.max_connections {
            warn!(
                conn_id,
                limit = shared.config.max_connections,
                "connection limit reached, closing client"
            );
            // reader/writer drop here, closing the socket.
            return;
        }
    }

    let (tx, rx) = mpsc::unbounded_channel::<Frame>();
    let max = shared.config.max_message_size;
    tokio::spawn(write_loop(writer, rx, max));

    let reader_shared = Arc::clone(shared);
    let reader_tx = tx.clone();
    let reader_task = tokio::spawn(async move {
        if let Err(e) = read_loop(&reader_shared, conn_id, reader, reader_tx).await {
            match e {
                TransportError::ConnectionClosed => debug!(conn_id, "client disconnected"),
                _ => warn!(conn_id, error = %e, "connection error"),
            }
        }
        reader_shared.connections.lock().remove(&conn_id);
    });

    shared.connections.lock().insert(
        conn_id,
        Connection {
            tx,
            reader: reader_task,
        },
    );
}

/// Writer task: drains queued frames onto the socket.
async fn write_loop(
    mut writer: BoxedWriter,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    max_message_size: usize,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame, max_message_size).await {
            debug!(error = %e, "write failed, dropping connection writer");
            break;
        }
    }
}

/// Reader task: decodes frames in arrival order and dispatches them.
async fn read_loop(
    shared: &Arc<Shared>,
    conn_id: ConnId,
    mut reader: BoxedReader,
    tx: mpsc::UnboundedSender<Frame>,
) -> Result<(), TransportError> {
    let mut decoder = FrameDecoder::new(shared.config.max_message_size);
    loop {
        let frame = match read_frame(&mut reader, &mut decoder).await {
            Ok(frame) => frame,
            Err(TransportError::MessageTooLarge { size, max }) => {
                // Oversize payload: answer invalid-request, then drop the
                // connection since the stream cannot be resynchronized.
                let response = RpcResponse::failure(
                    RequestId::Null,
                    RpcError::invalid_request(format!(
                        "Message too large: {size} bytes (max {max})"
                    )),
                );
                send_response(&tx, &response);
                return Err(TransportError::MessageTooLarge { size, max });
            }
            Err(e) => return Err(e),
        };

        match frame.kind {
            FrameKind::Heartbeat => {
                let _ = tx.send(Frame::heartbeat());
            }
            FrameKind::Request | FrameKind::Notification => {
                dispatch_payload(shared, conn_id, frame, &tx);
            }
            FrameKind::Response => {
                debug!(conn_id, "ignoring response frame sent to server");
            }
            FrameKind::Binary | FrameKind::AuthChallenge | FrameKind::AuthResponse => {
                debug!(conn_id, kind = ?frame.kind, "ignoring unhandled frame kind");
            }
        }
    }
}

/// Parse and dispatch one JSON-RPC payload.
fn dispatch_payload(
    shared: &Arc<Shared>,
    conn_id: ConnId,
    frame: Frame,
    tx: &mpsc::UnboundedSender<Frame>,
) {
    let mut request: RpcRequest = match serde_json::from_slice(&frame.payload) {
        Ok(request) => request,
        Err(e) => {
            debug!(conn_id, error = %e, "unparseable JSON-RPC payload");
            if frame.kind == FrameKind::Request {
                let response = RpcResponse::failure(RequestId::Null, RpcError::parse_error());
                send_response(tx, &response);
            }
            return;
        }
    };
    // A null id marks a notification just like an absent one: no response.
    let id = request
        .id
        .take()
        .filter(|id| !matches!(id, RequestId::Null));

    if let Err(error) = check_auth(&shared.config.auth_token, &mut request.params) {
        warn!(conn_id, method = %request.method, "rejected request with bad auth token");
        if let Some(id) = id {
            send_response(tx, &RpcResponse::failure(id, error));
        }
        return;
    }

    let Some(handler) = shared.methods.lookup(&request.method) else {
        debug!(conn_id, method = %request.method, "method not found");
        if let Some(id) = id {
            let response = RpcResponse::failure(id, RpcError::method_not_found(&request.method));
            send_response(tx, &response);
        }
        return;
    };

    // The handler future is created here, in arrival order, then completed
    // on its own task so a slow method never blocks the connection.
    let future = handler(request.params, conn_id);
    let tx = tx.clone();
    let method = request.method;
    tokio::spawn(async move {
        let outcome = future.await;
        match id {
            Some(id) => {
                let response = match outcome {
                    Ok(result) => RpcResponse::success(id, result),
                    Err(e) => RpcResponse::failure(id, e.into()),
                };
                send_response(&tx, &response);
            }
            None => {
                if let Err(e) = outcome {
                    debug!(method = %method, error = %e, "notification handler failed");
                }
            }
        }
    });
}

/// Validate and strip the reserved auth parameter.
fn check_auth(auth_token: &Option<String>, params: &mut Value) -> Result<(), RpcError> {
    let Some(expected) = auth_token else {
        return Ok(());
    };
    let provided = params
        .as_object_mut()
        .and_then(|map| map.remove(AUTH_PARAM));
    match provided {
        Some(Value::String(token)) if &token == expected => Ok(()),
        _ => Err(RpcError::invalid_request("Invalid auth token")),
    }
}

fn send_response(tx: &mpsc::UnboundedSender<Frame>, response: &RpcResponse) {
    match serde_json::to_vec(response) {
        Ok(payload) => {
            let _ = tx.send(Frame::new(FrameKind::Response, payload));
        }
        Err(e) => error!(error = %e, "failed to encode response"),
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
