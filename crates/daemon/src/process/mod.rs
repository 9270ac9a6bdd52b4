// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The process-manager plugin: owns the supervisor and exposes its
//! operations as the RPC methods `list`, `info`, `start`, `stop`,
//! `restart`, `delete`.

mod record;
mod spawn;
mod supervisor;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{error, warn};

use od_core::{CoreError, ErrorCode, ValidatedConfig};
use od_kernel::{Plugin, PluginContext, PluginManifest};

use crate::config_manager::CONFIG_STORE_KEY;
use supervisor::Supervisor;

/// Budget per process during plugin shutdown.
const SHUTDOWN_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// The process-manager plugin.
#[derive(Default)]
pub struct ProcessManagerPlugin {
    supervisor: Mutex<Option<Arc<Supervisor>>>,
}

impl std::fmt::Debug for ProcessManagerPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessManagerPlugin").finish_non_exhaustive()
    }
}

impl ProcessManagerPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn supervisor(&self) -> Result<Arc<Supervisor>, CoreError> {
        self.supervisor.lock().as_ref().map(Arc::clone).ok_or_else(|| {
            CoreError::new(
                ErrorCode::PluginInvalid,
                "process-manager is not installed",
            )
            .with_plugin("process-manager")
        })
    }
}

#[async_trait]
impl Plugin for ProcessManagerPlugin {
    fn manifest(&self) -> PluginManifest {
        PluginManifest::new("process-manager", env!("CARGO_PKG_VERSION"))
            .with_dependency("config-manager")
    }

    async fn install(&self, ctx: &PluginContext) -> Result<(), CoreError> {
        let supervisor = Supervisor::new(ctx.bus().clone());
        *self.supervisor.lock() = Some(Arc::clone(&supervisor));

        let sup = Arc::clone(&supervisor);
        ctx.register_method(
            "list",
            Arc::new(move |_params, _conn| {
                let sup = Arc::clone(&sup);
                Box::pin(async move { to_json(sup.list().await) })
            }),
        )?;

        let sup = Arc::clone(&supervisor);
        ctx.register_method(
            "info",
            Arc::new(move |params: Value, _conn| {
                let sup = Arc::clone(&sup);
                Box::pin(async move {
                    let name = required_name(&params)?;
                    to_json(sup.info(&name).await)
                })
            }),
        )?;

        let sup = Arc::clone(&supervisor);
        ctx.register_method(
            "start",
            Arc::new(move |params: Value, _conn| {
                let sup = Arc::clone(&sup);
                Box::pin(async move { to_json(sup.start_value(params).await?) })
            }),
        )?;

        let sup = Arc::clone(&supervisor);
        ctx.register_method(
            "stop",
            Arc::new(move |params: Value, _conn| {
                let sup = Arc::clone(&sup);
                Box::pin(async move {
                    let name = required_name(&params)?;
                    let signal = parse_signal(&params)?;
                    let timeout = params
                        .get("timeout")
                        .and_then(Value::as_u64)
                        .map(Duration::from_millis);
                    sup.stop(&name, signal, timeout).await?;
                    Ok(Value::Null)
                })
            }),
        )?;

        let sup = Arc::clone(&supervisor);
        ctx.register_method(
            "restart",
            Arc::new(move |params: Value, _conn| {
                let sup = Arc::clone(&sup);
                Box::pin(async move {
                    let name = required_name(&params)?;
                    to_json(sup.restart(&name).await?)
                })
            }),
        )?;

        let sup = Arc::clone(&supervisor);
        ctx.register_method(
            "delete",
            Arc::new(move |params: Value, _conn| {
                let sup = Arc::clone(&sup);
                Box::pin(async move {
                    let name = required_name(&params)?;
                    sup.delete(&name).await?;
                    Ok(Value::Null)
                })
            }),
        )?;

        Ok(())
    }

    /// Spawn the apps declared in the validated configuration. A failing
    /// app is logged and marked errored without failing daemon startup.
    async fn on_start(&self, ctx: &PluginContext) -> Result<(), CoreError> {
        let supervisor = self.supervisor()?;
        let Some(config_value) = ctx.store().get(CONFIG_STORE_KEY) else {
            return Ok(());
        };
        let config: ValidatedConfig = serde_json::from_value(config_value).map_err(|e| {
            CoreError::new(
                ErrorCode::ConfigInvalid,
                format!("stored configuration is unreadable: {e}"),
            )
        })?;
        for app in config.process_configs()? {
            let name = app.name.clone();
            if let Err(e) = supervisor.start(app).await {
                error!(process = %name, error = %e, "declared app failed to start");
            }
        }
        Ok(())
    }

    /// Stop every supervised process concurrently, then clear the table.
    async fn on_stop(&self, _ctx: &PluginContext) -> Result<(), CoreError> {
        let supervisor = self.supervisor()?;
        supervisor.stop_all(SHUTDOWN_STOP_TIMEOUT).await;
        Ok(())
    }
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Value, CoreError> {
    serde_json::to_value(value)
        .map_err(|e| CoreError::new(ErrorCode::Unknown, format!("serialization failed: {e}")))
}

fn required_name(params: &Value) -> Result<String, CoreError> {
    params
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CoreError::invalid_argument("missing \"name\" parameter"))
}

/// Parse an optional `signal` parameter (e.g. `"SIGTERM"`, `"SIGINT"`).
fn parse_signal(params: &Value) -> Result<Option<Signal>, CoreError> {
    let Some(value) = params.get("signal") else {
        return Ok(None);
    };
    let Some(name) = value.as_str() else {
        return Err(CoreError::invalid_argument("\"signal\" must be a string"));
    };
    match Signal::from_str(name) {
        Ok(signal) => Ok(Some(signal)),
        Err(_) => {
            warn!(signal = %name, "unknown signal name");
            Err(CoreError::invalid_argument(format!("unknown signal: {name}")))
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
