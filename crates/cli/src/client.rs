// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon client for CLI commands: socket resolution plus typed wrappers
//! over the RPC surface.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use od_core::config::DEFAULT_SOCKET_PATH;
use od_core::{ErrorCode, ProcessInfo};
use od_rpc::{ClientConfig, ClientError as RpcClientError, Endpoint, RpcClient};

/// Environment variable overriding the control socket path.
pub const SOCKET_ENV_VAR: &str = "OD_SOCKET";

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running (no socket at {0})")]
    DaemonNotRunning(PathBuf),

    #[error("{message} ({code})")]
    Daemon { code: ErrorCode, message: String },

    #[error(transparent)]
    Transport(#[from] RpcClientError),

    #[error("unexpected response shape: {0}")]
    UnexpectedResponse(#[from] serde_json::Error),
}

/// `daemon.status` response.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonStatus {
    pub status: String,
    pub pid: u32,
    pub uptime: u64,
    #[serde(default)]
    pub version: Option<String>,
}

/// Resolve the control socket path: flag, then `OD_SOCKET`, then the
/// default.
pub fn socket_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var_os(SOCKET_ENV_VAR).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
}

/// Typed client over the daemon's RPC surface.
#[derive(Debug)]
pub struct DaemonClient {
    rpc: RpcClient,
}

impl DaemonClient {
    /// Connect to the daemon at `socket`, failing fast when the socket
    /// file does not exist.
    pub async fn connect(socket: &Path) -> Result<Self, ClientError> {
        if !socket.exists() {
            return Err(ClientError::DaemonNotRunning(socket.to_path_buf()));
        }
        let config = ClientConfig::new(Endpoint::Unix(socket.to_path_buf()));
        let rpc = RpcClient::connect(config).await?;
        Ok(Self { rpc })
    }

    /// Connect with a custom per-call timeout.
    pub async fn connect_with_timeout(
        socket: &Path,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        if !socket.exists() {
            return Err(ClientError::DaemonNotRunning(socket.to_path_buf()));
        }
        let mut config = ClientConfig::new(Endpoint::Unix(socket.to_path_buf()));
        config.call_timeout = timeout;
        let rpc = RpcClient::connect(config).await?;
        Ok(Self { rpc })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        match self.rpc.call(method, params).await {
            Ok(value) => Ok(value),
            Err(RpcClientError::Rpc(e)) => {
                let code = e.domain_code().unwrap_or(ErrorCode::Unknown);
                Err(ClientError::Daemon {
                    code,
                    message: e.message,
                })
            }
            Err(e) => Err(ClientError::Transport(e)),
        }
    }

    pub async fn list(&self) -> Result<Vec<ProcessInfo>, ClientError> {
        let value = self.call("list", json!(null)).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn info(&self, name: &str) -> Result<Option<ProcessInfo>, ClientError> {
        let value = self.call("info", json!({"name": name})).await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    /// Start a process from a decoded process-config value.
    pub async fn start(&self, config: Value) -> Result<ProcessInfo, ClientError> {
        let value = self.call("start", config).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn stop(
        &self,
        name: &str,
        signal: Option<&str>,
        timeout_ms: Option<u64>,
    ) -> Result<(), ClientError> {
        let mut params = json!({"name": name});
        if let Some(signal) = signal {
            params["signal"] = json!(signal);
        }
        if let Some(timeout_ms) = timeout_ms {
            params["timeout"] = json!(timeout_ms);
        }
        self.call("stop", params).await?;
        Ok(())
    }

    pub async fn restart(&self, name: &str) -> Result<ProcessInfo, ClientError> {
        let value = self.call("restart", json!({"name": name})).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn delete(&self, name: &str) -> Result<(), ClientError> {
        self.call("delete", json!({"name": name})).await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<DaemonStatus, ClientError> {
        let value = self.call("daemon.status", json!(null)).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.call("daemon.shutdown", json!(null)).await?;
        Ok(())
    }

    pub async fn config_get(&self) -> Result<Value, ClientError> {
        self.call("config.get", json!(null)).await
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
