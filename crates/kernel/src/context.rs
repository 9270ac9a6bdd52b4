// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The capability bundle handed to every plugin hook: configuration,
//! event bus, state store, RPC method registration, inter-plugin hooks,
//! metric counters, a namespaced logger, and peer lookup.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use od_core::{CoreError, ErrorCode, EventBus, StateStore};
use od_rpc::{MethodHandler, Methods};

use crate::plugin::{Plugin, PluginPhase};
use crate::registry::PluginRegistry;

/// Future returned by an inter-plugin hook handler.
pub type HookFuture = Pin<Box<dyn Future<Output = Result<Value, CoreError>> + Send>>;

/// An inter-plugin hook handler.
pub type HookHandler = Arc<dyn Fn(Value) -> HookFuture + Send + Sync>;

/// Named inter-plugin hooks: any plugin may register handlers, any plugin
/// may invoke them.
#[derive(Default)]
pub struct Hooks {
    handlers: Mutex<HashMap<String, Vec<HookHandler>>>,
}

impl Hooks {
    pub fn register(&self, name: impl Into<String>, handler: HookHandler) {
        self.handlers.lock().entry(name.into()).or_default().push(handler);
    }

    /// Invoke every handler registered under `name`, in registration
    /// order, collecting each outcome.
    pub async fn invoke(&self, name: &str, payload: Value) -> Vec<Result<Value, CoreError>> {
        let handlers: Vec<HookHandler> = self
            .handlers
            .lock()
            .get(name)
            .map(|hs| hs.to_vec())
            .unwrap_or_default();
        let mut results = Vec::with_capacity(handlers.len());
        for handler in handlers {
            results.push(handler(payload.clone()).await);
        }
        results
    }

    pub fn handler_count(&self, name: &str) -> usize {
        self.handlers.lock().get(name).map_or(0, Vec::len)
    }
}

/// Monotonic metric counters.
#[derive(Default)]
pub struct Metrics {
    counters: Mutex<HashMap<String, u64>>,
}

impl Metrics {
    pub fn incr(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, n: u64) {
        *self.counters.lock().entry(name.to_string()).or_insert(0) += n;
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.counters.lock().clone()
    }
}

/// Read-only view into the registry for peer lookup.
#[derive(Clone)]
pub struct PluginDirectory {
    registry: Arc<RwLock<PluginRegistry>>,
}

impl PluginDirectory {
    pub(crate) fn new(registry: Arc<RwLock<PluginRegistry>>) -> Self {
        Self { registry }
    }

    pub fn plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.registry.read().plugin(name)
    }

    pub fn phase(&self, name: &str) -> Option<PluginPhase> {
        self.registry.read().phase(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.read().contains(name)
    }
}

/// Logger scoped to one plugin.
#[derive(Clone)]
pub struct PluginLogger {
    plugin: String,
}

impl PluginLogger {
    pub fn info(&self, message: &str) {
        info!(plugin = %self.plugin, "{message}");
    }

    pub fn warn(&self, message: &str) {
        warn!(plugin = %self.plugin, "{message}");
    }

    pub fn error(&self, message: &str) {
        error!(plugin = %self.plugin, "{message}");
    }

    pub fn debug(&self, message: &str) {
        debug!(plugin = %self.plugin, "{message}");
    }
}

/// Context passed to every plugin hook.
#[derive(Clone)]
pub struct PluginContext {
    plugin_name: String,
    daemon_config: Value,
    plugin_config: Value,
    bus: EventBus,
    store: StateStore,
    methods: Methods,
    hooks: Arc<Hooks>,
    metrics: Arc<Metrics>,
    directory: PluginDirectory,
}

impl PluginContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        plugin_name: String,
        daemon_config: Value,
        plugin_config: Value,
        bus: EventBus,
        store: StateStore,
        methods: Methods,
        hooks: Arc<Hooks>,
        metrics: Arc<Metrics>,
        directory: PluginDirectory,
    ) -> Self {
        Self {
            plugin_name,
            daemon_config,
            plugin_config,
            bus,
            store,
            methods,
            hooks,
            metrics,
            directory,
        }
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// The full decoded daemon configuration.
    pub fn daemon_config(&self) -> &Value {
        &self.daemon_config
    }

    /// This plugin's slice of `config.plugins`, or null.
    pub fn plugin_config(&self) -> &Value {
        &self.plugin_config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn plugins(&self) -> &PluginDirectory {
        &self.directory
    }

    pub fn logger(&self) -> PluginLogger {
        PluginLogger {
            plugin: self.plugin_name.clone(),
        }
    }

    /// Register an RPC method owned by this plugin.
    ///
    /// The handler is wrapped with a readiness gate: requests are only
    /// dispatched while the owning plugin is in the `ready` phase.
    pub fn register_method(
        &self,
        name: impl Into<String>,
        handler: MethodHandler,
    ) -> Result<(), CoreError> {
        let plugin = self.plugin_name.clone();
        let directory = self.directory.clone();
        let gated: MethodHandler = Arc::new(move |params, conn| {
            if directory.phase(&plugin) != Some(PluginPhase::Ready) {
                let plugin = plugin.clone();
                return Box::pin(async move {
                    Err(CoreError::new(
                        ErrorCode::PluginInvalid,
                        format!("plugin \"{plugin}\" is not ready"),
                    )
                    .with_plugin(plugin))
                });
            }
            handler(params, conn)
        });
        self.methods.register(name, gated)
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
