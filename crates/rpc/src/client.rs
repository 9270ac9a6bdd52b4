// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC client: one connection, multiplexed calls reunified by request id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::endpoint::{self, BoxedReader, Endpoint};
use crate::frame::{
    read_frame, write_frame, Frame, FrameDecoder, FrameKind, TransportError,
    DEFAULT_MAX_MESSAGE_SIZE,
};
use crate::jsonrpc::{RequestId, RpcError, RpcRequest, RpcResponse};
use crate::server::AUTH_PARAM;

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection refused: {0}")]
    ConnectionRefused(#[source] std::io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("{0}")]
    Rpc(#[from] RpcError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    pub call_timeout: Duration,
    pub max_message_size: usize,
    pub auth_token: Option<String>,
}

impl ClientConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            auth_token: None,
        }
    }
}

/// Handler for server-pushed notifications.
pub type NotificationHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

struct ClientShared {
    pending: Mutex<HashMap<i64, oneshot::Sender<RpcResponse>>>,
    notification_handlers: Mutex<Vec<NotificationHandler>>,
    tx: mpsc::UnboundedSender<Frame>,
    closed: AtomicBool,
}

/// RPC client over a single connection.
pub struct RpcClient {
    config: ClientConfig,
    shared: Arc<ClientShared>,
    next_id: AtomicI64,
    reader_task: JoinHandle<()>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Open a connection to the endpoint.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let (reader, mut writer) = endpoint::connect(&config.endpoint)
            .await
            .map_err(ClientError::ConnectionRefused)?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
        let shared = Arc::new(ClientShared {
            pending: Mutex::new(HashMap::new()),
            notification_handlers: Mutex::new(Vec::new()),
            tx,
            closed: AtomicBool::new(false),
        });

        let max = config.max_message_size;
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &frame, max).await {
                    debug!(error = %e, "client write failed");
                    break;
                }
            }
        });

        let reader_shared = Arc::clone(&shared);
        let reader_task = tokio::spawn(async move {
            read_loop(&reader_shared, reader, max).await;
            close_shared(&reader_shared);
        });

        Ok(Self {
            config,
            shared,
            next_id: AtomicI64::new(1),
            reader_task,
        })
    }

    /// Whether the underlying connection has closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Register a handler for server-pushed notifications.
    pub fn on_notification(&self, handler: NotificationHandler) {
        self.shared.notification_handlers.lock().push(handler);
    }

    /// Call `method`, waiting for the matching response up to the
    /// configured timeout.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        self.call_with_timeout(method, params, self.config.call_timeout)
            .await
    }

    /// Call `method` with an explicit per-call timeout.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::call(id, method, self.authed_params(params));
        let payload = serde_json::to_vec(&request)?;

        let (sender, receiver) = oneshot::channel();
        self.shared.pending.lock().insert(id, sender);

        if self
            .shared
            .tx
            .send(Frame::new(FrameKind::Request, payload))
            .is_err()
        {
            self.shared.pending.lock().remove(&id);
            return Err(ClientError::ConnectionClosed);
        }

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => response.into_result().map_err(ClientError::Rpc),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                // Expired: remove the pending entry so a late response is
                // logged and dropped instead of completing a dead call.
                self.shared.pending.lock().remove(&id);
                Err(ClientError::Timeout(timeout))
            }
        }
    }

    /// Fire a notification; no response is expected.
    pub fn notify(&self, method: &str, params: Value) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        let request = RpcRequest::notification(method, self.authed_params(params));
        let payload = serde_json::to_vec(&request)?;
        self.shared
            .tx
            .send(Frame::new(FrameKind::Notification, payload))
            .map_err(|_| ClientError::ConnectionClosed)
    }

    /// Send a heartbeat frame; the server echoes it.
    pub fn heartbeat(&self) -> Result<(), ClientError> {
        self.shared
            .tx
            .send(Frame::heartbeat())
            .map_err(|_| ClientError::ConnectionClosed)
    }

    /// Close the connection, rejecting all pending calls.
    pub fn close(&self) {
        self.reader_task.abort();
        close_shared(&self.shared);
    }

    /// Attach the shared auth token under the reserved params key.
    fn authed_params(&self, params: Value) -> Value {
        let Some(token) = &self.config.auth_token else {
            return params;
        };
        let mut map = match params {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => return other,
        };
        map.insert(AUTH_PARAM.to_string(), Value::String(token.clone()));
        Value::Object(map)
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Mark closed and drop all pending continuations; their receivers observe
/// `connection-closed`.
fn close_shared(shared: &ClientShared) {
    shared.closed.store(true, Ordering::SeqCst);
    shared.pending.lock().clear();
}

async fn read_loop(shared: &ClientShared, mut reader: BoxedReader, max_message_size: usize) {
    let mut decoder = FrameDecoder::new(max_message_size);
    loop {
        let frame = match read_frame(&mut reader, &mut decoder).await {
            Ok(frame) => frame,
            Err(TransportError::ConnectionClosed) => {
                debug!("server closed the connection");
                return;
            }
            Err(e) => {
                warn!(error = %e, "client transport error");
                return;
            }
        };

        match frame.kind {
            FrameKind::Response => handle_response(shared, &frame.payload),
            FrameKind::Notification => handle_notification(shared, &frame.payload),
            FrameKind::Heartbeat => {
                let _ = shared.tx.send(Frame::heartbeat());
            }
            FrameKind::Request => {
                debug!("ignoring request frame sent to client");
            }
            FrameKind::Binary | FrameKind::AuthChallenge | FrameKind::AuthResponse => {
                debug!(kind = ?frame.kind, "ignoring unhandled frame kind");
            }
        }
    }
}

fn handle_response(shared: &ClientShared, payload: &[u8]) {
    let response: RpcResponse = match serde_json::from_slice(payload) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "unparseable response payload");
            return;
        }
    };
    let RequestId::Number(id) = response.id else {
        warn!(id = ?response.id, "response with non-numeric id");
        return;
    };
    match shared.pending.lock().remove(&id) {
        Some(sender) => {
            let _ = sender.send(response);
        }
        None => {
            warn!(id, "unmatched response id, dropping");
        }
    }
}

fn handle_notification(shared: &ClientShared, payload: &[u8]) {
    let request: RpcRequest = match serde_json::from_slice(payload) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "unparseable notification payload");
            return;
        }
    };
    let handlers: Vec<NotificationHandler> =
        shared.notification_handlers.lock().iter().cloned().collect();
    for handler in handlers {
        handler(&request.method, &request.params);
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
