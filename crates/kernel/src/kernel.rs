// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The kernel: owns the process-wide singletons (event bus, state store,
//! plugin registry, RPC method table), drives the daemon lifecycle state
//! machine, and runs the periodic health watchdog.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use od_core::config::DEFAULT_SHUTDOWN_TIMEOUT_MS;
use od_core::{events, CoreError, ErrorCode, EventBus, StateMachine, StateStore};
use od_rpc::Methods;

use crate::context::{Hooks, Metrics, PluginContext, PluginDirectory};
use crate::plugin::{Plugin, PluginPhase};
use crate::registry::PluginRegistry;

/// Watchdog poll period.
pub const WATCHDOG_PERIOD: Duration = Duration::from_secs(30);

/// Daemon lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    Created,
    Starting,
    Started,
    Ready,
    Stopping,
    Stopped,
    Error,
}

impl DaemonState {
    pub fn as_str(self) -> &'static str {
        match self {
            DaemonState::Created => "created",
            DaemonState::Starting => "starting",
            DaemonState::Started => "started",
            DaemonState::Ready => "ready",
            DaemonState::Stopping => "stopping",
            DaemonState::Stopped => "stopped",
            DaemonState::Error => "error",
        }
    }
}

/// Daemon lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DaemonEvent {
    Start,
    PluginsInstalled,
    PluginsStarted,
    Stop,
    Stopped,
    Error,
}

/// Build the lifecycle table: the happy path plus an `error` sink
/// reachable from every non-terminal state.
fn lifecycle_machine() -> StateMachine<DaemonState, DaemonEvent> {
    let mut machine = StateMachine::new(DaemonState::Created)
        .with_transition(DaemonState::Created, DaemonEvent::Start, DaemonState::Starting)
        .with_transition(
            DaemonState::Starting,
            DaemonEvent::PluginsInstalled,
            DaemonState::Started,
        )
        .with_transition(
            DaemonState::Started,
            DaemonEvent::PluginsStarted,
            DaemonState::Ready,
        )
        .with_transition(DaemonState::Ready, DaemonEvent::Stop, DaemonState::Stopping)
        .with_transition(DaemonState::Starting, DaemonEvent::Stop, DaemonState::Stopping)
        .with_transition(DaemonState::Started, DaemonEvent::Stop, DaemonState::Stopping)
        .with_transition(DaemonState::Error, DaemonEvent::Stop, DaemonState::Stopping)
        .with_transition(
            DaemonState::Stopping,
            DaemonEvent::Stopped,
            DaemonState::Stopped,
        );
    for state in [
        DaemonState::Created,
        DaemonState::Starting,
        DaemonState::Started,
        DaemonState::Ready,
        DaemonState::Stopping,
    ] {
        machine.add_transition(state, DaemonEvent::Error, DaemonState::Error);
    }
    machine
}

/// The plugin-hosting micro-kernel.
pub struct Kernel {
    registry: Arc<RwLock<PluginRegistry>>,
    bus: EventBus,
    store: StateStore,
    methods: Methods,
    hooks: Arc<Hooks>,
    metrics: Arc<Metrics>,
    machine: tokio::sync::Mutex<StateMachine<DaemonState, DaemonEvent>>,
    state_cache: Mutex<DaemonState>,
    config: Mutex<Value>,
    load_order: Mutex<Vec<String>>,
    shutdown_timeout: Mutex<Duration>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    started_at: Mutex<Option<Instant>>,
    /// Self-handle for the watchdog task.
    me: Weak<Kernel>,
}

impl Kernel {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            registry: Arc::new(RwLock::new(PluginRegistry::new())),
            bus: EventBus::new(),
            store: StateStore::new(),
            methods: Methods::new(),
            hooks: Arc::new(Hooks::default()),
            metrics: Arc::new(Metrics::default()),
            machine: tokio::sync::Mutex::new(lifecycle_machine()),
            state_cache: Mutex::new(DaemonState::Created),
            config: Mutex::new(Value::Null),
            load_order: Mutex::new(Vec::new()),
            shutdown_timeout: Mutex::new(Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS)),
            watchdog: Mutex::new(None),
            started_at: Mutex::new(None),
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn methods(&self) -> &Methods {
        &self.methods
    }

    pub fn state(&self) -> DaemonState {
        *self.state_cache.lock()
    }

    /// Seconds since the kernel reached `ready`; zero before that.
    pub fn uptime(&self) -> Duration {
        self.started_at
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    pub fn plugins(&self) -> PluginDirectory {
        PluginDirectory::new(Arc::clone(&self.registry))
    }

    /// Register a plugin. Must happen before `start`.
    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<(), CoreError> {
        self.registry.write().register(plugin)
    }

    pub fn unregister_plugin(&self, name: &str) -> Result<(), CoreError> {
        self.registry.write().unregister(name).map(|_| ())
    }

    async fn transition(&self, event: DaemonEvent) -> Result<DaemonState, CoreError> {
        let mut machine = self.machine.lock().await;
        let state = machine.transition(event).await?;
        *self.state_cache.lock() = state;
        Ok(state)
    }

    /// Transition into the error sink; logs instead of failing if the
    /// machine refuses (terminal states).
    async fn fail(&self) {
        if let Err(e) = self.transition(DaemonEvent::Error).await {
            warn!(error = %e, "could not enter error state");
        }
    }

    fn context_for(&self, plugin_name: &str) -> PluginContext {
        let config = self.config.lock().clone();
        let plugin_config = config
            .get("plugins")
            .and_then(|p| p.get(plugin_name))
            .cloned()
            .unwrap_or(Value::Null);
        PluginContext::new(
            plugin_name.to_string(),
            config,
            plugin_config,
            self.bus.clone(),
            self.store.clone(),
            self.methods.clone(),
            Arc::clone(&self.hooks),
            Arc::clone(&self.metrics),
            PluginDirectory::new(Arc::clone(&self.registry)),
        )
    }

    /// Start the daemon: install, start, and ready every registered plugin
    /// in dependency order, then arm the watchdog and publish
    /// `daemon:ready`.
    pub async fn start(&self, config: Value) -> Result<(), CoreError> {
        if self.state() != DaemonState::Created {
            return Err(CoreError::new(
                ErrorCode::DaemonAlreadyRunning,
                "kernel already started",
            ));
        }
        *self.config.lock() = config.clone();
        if let Some(ms) = config
            .get("daemon")
            .and_then(|d| d.get("shutdownTimeoutMs"))
            .and_then(Value::as_u64)
        {
            *self.shutdown_timeout.lock() = Duration::from_millis(ms);
        }

        self.transition(DaemonEvent::Start).await?;

        let order = match self.registry.read().resolve_load_order() {
            Ok(order) => order,
            Err(e) => {
                self.fail().await;
                return Err(e);
            }
        };
        *self.load_order.lock() = order.clone();
        info!(order = ?order, "resolved plugin load order");

        // Install phase: failures are fatal to startup. Installed plugins
        // are left in place; the process is expected to exit.
        let timeout = *self.shutdown_timeout.lock();
        for name in &order {
            let Some(plugin) = self.registry.read().plugin(name) else {
                continue;
            };
            let ctx = self.context_for(name);
            self.registry.write().set_phase(name, PluginPhase::Installing);
            let outcome = tokio::time::timeout(timeout, plugin.install(&ctx)).await;
            match outcome {
                Ok(Ok(())) => {
                    self.registry.write().set_phase(name, PluginPhase::Installed);
                }
                Ok(Err(e)) => {
                    self.registry.write().set_last_error(name, e.clone());
                    self.fail().await;
                    return Err(install_failure(name, e));
                }
                Err(_) => {
                    let e = CoreError::timeout(format!("install of plugin \"{name}\""), timeout);
                    self.registry.write().set_last_error(name, e.clone());
                    self.fail().await;
                    return Err(install_failure(name, e));
                }
            }
        }
        self.transition(DaemonEvent::PluginsInstalled).await?;

        // Start phase: failures remain fatal.
        for name in &order {
            let Some(plugin) = self.registry.read().plugin(name) else {
                continue;
            };
            let ctx = self.context_for(name);
            self.registry.write().set_phase(name, PluginPhase::Starting);
            if let Err(e) = plugin.on_start(&ctx).await {
                self.registry.write().set_last_error(name, e.clone());
                self.fail().await;
                return Err(install_failure(name, e));
            }
        }

        // Ready phase: failures are logged but do not fail startup.
        for name in &order {
            let Some(plugin) = self.registry.read().plugin(name) else {
                continue;
            };
            let ctx = self.context_for(name);
            if let Err(e) = plugin.on_ready(&ctx).await {
                warn!(plugin = %name, error = %e, "onReady failed");
                self.registry.write().set_last_error(name, e);
            }
            self.registry.write().set_phase(name, PluginPhase::Ready);
        }
        self.transition(DaemonEvent::PluginsStarted).await?;

        *self.started_at.lock() = Some(Instant::now());
        self.arm_watchdog();
        self.bus.publish(events::DAEMON_READY, json!({}));
        info!("kernel ready");
        Ok(())
    }

    /// Stop the daemon: reverse-order `on_stop`, each bounded by the
    /// shutdown timeout; failures are logged and the next plugin still
    /// stops.
    pub async fn stop(&self) -> Result<(), CoreError> {
        let state = self.state();
        if state == DaemonState::Stopped || state == DaemonState::Created {
            return Ok(());
        }

        if let Some(watchdog) = self.watchdog.lock().take() {
            watchdog.abort();
        }

        self.transition(DaemonEvent::Stop).await?;

        let order = self.load_order.lock().clone();
        let timeout = *self.shutdown_timeout.lock();
        for name in order.iter().rev() {
            let Some(plugin) = self.registry.read().plugin(name) else {
                continue;
            };
            let ctx = self.context_for(name);
            self.registry.write().set_phase(name, PluginPhase::Stopping);
            match tokio::time::timeout(timeout, plugin.on_stop(&ctx)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(plugin = %name, error = %e, "onStop failed");
                    self.registry.write().set_last_error(name, e);
                }
                Err(_) => {
                    let e = CoreError::timeout(format!("stop of plugin \"{name}\""), timeout);
                    warn!(plugin = %name, error = %e, "onStop timed out");
                    self.registry.write().set_last_error(name, e);
                }
            }
            self.registry.write().set_phase(name, PluginPhase::Stopped);
        }

        self.transition(DaemonEvent::Stopped).await?;
        *self.started_at.lock() = None;
        self.bus.publish(events::DAEMON_STOPPED, json!({}));
        info!("kernel stopped");
        Ok(())
    }

    fn arm_watchdog(&self) {
        let Some(kernel) = self.me.upgrade() else {
            return;
        };
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(WATCHDOG_PERIOD);
            // The first tick completes immediately; consume it so probes
            // start one full period after ready.
            interval.tick().await;
            loop {
                interval.tick().await;
                kernel.run_health_checks().await;
            }
        });
        *self.watchdog.lock() = Some(handle);
    }

    /// One watchdog sweep: poll the health probe of every ready plugin
    /// that exposes one. Probe errors are logged, never propagated.
    pub async fn run_health_checks(&self) {
        let timeout = *self.shutdown_timeout.lock();
        let names = self.registry.read().names_in_phase(PluginPhase::Ready);
        for name in names {
            let Some(plugin) = self.registry.read().plugin(&name) else {
                continue;
            };
            if !plugin.provides_health_check() {
                continue;
            }
            let ctx = self.context_for(&name);
            match tokio::time::timeout(timeout, plugin.health_check(&ctx)).await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    warn!(plugin = %name, "health probe returned false");
                    self.bus
                        .publish(events::PLUGIN_UNHEALTHY, json!({"name": name}));
                    let err = CoreError::new(
                        ErrorCode::HealthCheckFailed,
                        format!("health check failed for plugin \"{name}\""),
                    )
                    .with_plugin(&name);
                    self.registry.write().set_last_error(&name, err.clone());
                    plugin.on_error(&ctx, &err).await;
                }
                Ok(Err(e)) => {
                    error!(plugin = %name, error = %e, "health probe errored");
                }
                Err(_) => {
                    error!(
                        plugin = %name,
                        timeout_ms = timeout.as_millis() as u64,
                        "health probe timed out"
                    );
                }
            }
        }
    }
}

fn install_failure(plugin: &str, cause: CoreError) -> CoreError {
    CoreError::new(
        ErrorCode::PluginInitializationFailed,
        format!("plugin \"{plugin}\" failed to initialize: {}", cause.message),
    )
    .with_plugin(plugin)
}

#[cfg(test)]
#[path = "kernel_tests.rs"]
mod tests;
