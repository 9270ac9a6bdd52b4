// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use od_core::{CoreError, ErrorCode};

use super::*;
use crate::context::PluginContext;
use crate::plugin::{Plugin, PluginManifest, PluginPhase};

/// Shared call log keyed by "<plugin>:<hook>".
type CallLog = Arc<Mutex<Vec<String>>>;

/// Test plugin with switchable failure modes.
#[derive(Debug)]
struct TestPlugin {
    manifest: PluginManifest,
    log: CallLog,
    fail_install: bool,
    fail_start: bool,
    fail_ready: bool,
    fail_stop: bool,
    install_delay: Option<Duration>,
    healthy: Option<Arc<Mutex<bool>>>,
}

impl TestPlugin {
    fn new(manifest: PluginManifest, log: &CallLog) -> Self {
        Self {
            manifest,
            log: Arc::clone(log),
            fail_install: false,
            fail_start: false,
            fail_ready: false,
            fail_stop: false,
            install_delay: None,
            healthy: None,
        }
    }

    fn record(&self, hook: &str) {
        self.log.lock().push(format!("{}:{hook}", self.manifest.name));
    }

    fn boom(&self, hook: &str) -> CoreError {
        CoreError::new(ErrorCode::Unknown, format!("{hook} failed"))
    }
}

#[async_trait]
impl Plugin for TestPlugin {
    fn manifest(&self) -> PluginManifest {
        self.manifest.clone()
    }

    async fn install(&self, _ctx: &PluginContext) -> Result<(), CoreError> {
        if let Some(delay) = self.install_delay {
            tokio::time::sleep(delay).await;
        }
        self.record("install");
        if self.fail_install {
            return Err(self.boom("install"));
        }
        Ok(())
    }

    async fn on_start(&self, _ctx: &PluginContext) -> Result<(), CoreError> {
        self.record("start");
        if self.fail_start {
            return Err(self.boom("start"));
        }
        Ok(())
    }

    async fn on_ready(&self, _ctx: &PluginContext) -> Result<(), CoreError> {
        self.record("ready");
        if self.fail_ready {
            return Err(self.boom("ready"));
        }
        Ok(())
    }

    async fn on_stop(&self, _ctx: &PluginContext) -> Result<(), CoreError> {
        self.record("stop");
        if self.fail_stop {
            return Err(self.boom("stop"));
        }
        Ok(())
    }

    async fn on_error(&self, _ctx: &PluginContext, error: &CoreError) {
        self.log
            .lock()
            .push(format!("{}:error:{}", self.manifest.name, error.code));
    }

    fn provides_health_check(&self) -> bool {
        self.healthy.is_some()
    }

    async fn health_check(&self, _ctx: &PluginContext) -> Result<bool, CoreError> {
        Ok(self.healthy.as_ref().map(|h| *h.lock()).unwrap_or(true))
    }
}

fn plugin(name: &str, log: &CallLog) -> TestPlugin {
    TestPlugin::new(PluginManifest::new(name, "1.0.0"), log)
}

#[tokio::test]
async fn start_runs_phases_in_order_and_stop_reverses() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let kernel = Kernel::new();
    kernel
        .register_plugin(Arc::new(TestPlugin::new(
            PluginManifest::new("app", "1.0.0").with_dependency("base"),
            &log,
        )))
        .unwrap();
    kernel.register_plugin(Arc::new(plugin("base", &log))).unwrap();

    kernel.start(json!({})).await.unwrap();
    assert_eq!(kernel.state(), DaemonState::Ready);
    assert_eq!(kernel.plugins().phase("base"), Some(PluginPhase::Ready));
    assert_eq!(kernel.plugins().phase("app"), Some(PluginPhase::Ready));

    kernel.stop().await.unwrap();
    assert_eq!(kernel.state(), DaemonState::Stopped);

    assert_eq!(
        *log.lock(),
        vec![
            "base:install",
            "app:install",
            "base:start",
            "app:start",
            "base:ready",
            "app:ready",
            // reverse order on stop
            "app:stop",
            "base:stop",
        ]
    );
}

#[tokio::test]
async fn start_twice_is_already_running() {
    let kernel = Kernel::new();
    kernel.start(json!({})).await.unwrap();
    let err = kernel.start(json!({})).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::DaemonAlreadyRunning);
    kernel.stop().await.unwrap();
}

#[tokio::test]
async fn install_failure_is_fatal_and_enters_error_state() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let kernel = Kernel::new();
    let mut bad = plugin("bad", &log);
    bad.fail_install = true;
    kernel.register_plugin(Arc::new(bad)).unwrap();
    kernel.register_plugin(Arc::new(plugin("after", &log))).unwrap();

    let err = kernel.start(json!({})).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PluginInitializationFailed);
    assert_eq!(err.context.plugin.as_deref(), Some("bad"));
    assert_eq!(kernel.state(), DaemonState::Error);
    // The failing plugin halts the install phase.
    assert_eq!(*log.lock(), vec!["bad:install"]);
}

#[tokio::test]
async fn install_timeout_is_fatal() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let kernel = Kernel::new();
    let mut slow = plugin("slow", &log);
    slow.install_delay = Some(Duration::from_secs(5));
    kernel.register_plugin(Arc::new(slow)).unwrap();

    let err = kernel
        .start(json!({"daemon": {"shutdownTimeoutMs": 50}}))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::PluginInitializationFailed);
    assert!(err.message.contains("timed out"));
    assert_eq!(kernel.state(), DaemonState::Error);
}

#[tokio::test]
async fn on_start_failure_is_fatal() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let kernel = Kernel::new();
    let mut bad = plugin("bad", &log);
    bad.fail_start = true;
    kernel.register_plugin(Arc::new(bad)).unwrap();

    let err = kernel.start(json!({})).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PluginInitializationFailed);
    assert_eq!(kernel.state(), DaemonState::Error);
}

#[tokio::test]
async fn on_ready_failure_is_not_fatal() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let kernel = Kernel::new();
    let mut flaky = plugin("flaky", &log);
    flaky.fail_ready = true;
    kernel.register_plugin(Arc::new(flaky)).unwrap();

    kernel.start(json!({})).await.unwrap();
    assert_eq!(kernel.state(), DaemonState::Ready);
    assert_eq!(kernel.plugins().phase("flaky"), Some(PluginPhase::Ready));
    kernel.stop().await.unwrap();
}

#[tokio::test]
async fn missing_dependency_fails_startup() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let kernel = Kernel::new();
    kernel
        .register_plugin(Arc::new(TestPlugin::new(
            PluginManifest::new("app", "1.0.0").with_dependency("ghost"),
            &log,
        )))
        .unwrap();

    let err = kernel.start(json!({})).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PluginMissingDependency);
    assert_eq!(kernel.state(), DaemonState::Error);
}

#[tokio::test]
async fn stop_is_idempotent_and_noop_before_start() {
    let kernel = Kernel::new();
    // created: no-op
    kernel.stop().await.unwrap();
    assert_eq!(kernel.state(), DaemonState::Created);

    kernel.start(json!({})).await.unwrap();
    kernel.stop().await.unwrap();
    assert_eq!(kernel.state(), DaemonState::Stopped);
    // stopped: no-op
    kernel.stop().await.unwrap();
    assert_eq!(kernel.state(), DaemonState::Stopped);
}

#[tokio::test]
async fn on_stop_failure_does_not_block_other_plugins() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let kernel = Kernel::new();
    let mut bad = plugin("bad", &log);
    bad.fail_stop = true;
    kernel.register_plugin(Arc::new(plugin("first", &log))).unwrap();
    kernel.register_plugin(Arc::new(bad)).unwrap();

    kernel.start(json!({})).await.unwrap();
    log.lock().clear();
    kernel.stop().await.unwrap();

    // Reverse order: bad stops (and fails) first, first still stops.
    assert_eq!(*log.lock(), vec!["bad:stop", "first:stop"]);
    assert_eq!(kernel.state(), DaemonState::Stopped);
}

#[tokio::test]
async fn stop_after_error_state_still_stops_plugins() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let kernel = Kernel::new();
    kernel.register_plugin(Arc::new(plugin("ok", &log))).unwrap();
    let mut bad = plugin("bad", &log);
    bad.fail_start = true;
    kernel.register_plugin(Arc::new(bad)).unwrap();

    assert!(kernel.start(json!({})).await.is_err());
    assert_eq!(kernel.state(), DaemonState::Error);

    kernel.stop().await.unwrap();
    assert_eq!(kernel.state(), DaemonState::Stopped);
}

#[tokio::test]
async fn failed_health_probe_publishes_unhealthy_and_calls_on_error() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let kernel = Kernel::new();
    let healthy = Arc::new(Mutex::new(true));
    let mut probed = plugin("probed", &log);
    probed.healthy = Some(Arc::clone(&healthy));
    kernel.register_plugin(Arc::new(probed)).unwrap();

    kernel.start(json!({})).await.unwrap();

    let unhealthy_events: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&unhealthy_events);
    kernel.bus().subscribe(
        "plugin:unhealthy",
        Arc::new(move |ev| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().push(ev.data);
                Ok(())
            })
        }),
    );

    // Healthy: nothing happens.
    kernel.run_health_checks().await;
    assert!(unhealthy_events.lock().is_empty());

    // Unhealthy: event published, on_error invoked with the taxonomy code.
    *healthy.lock() = false;
    kernel.run_health_checks().await;
    assert_eq!(unhealthy_events.lock().len(), 1);
    assert_eq!(unhealthy_events.lock()[0], json!({"name": "probed"}));
    assert!(log
        .lock()
        .iter()
        .any(|l| l == "probed:error:health-check-failed"));

    kernel.stop().await.unwrap();
}

#[tokio::test]
async fn daemon_ready_event_is_published() {
    let kernel = Kernel::new();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let tx = Arc::new(Mutex::new(Some(tx)));
    kernel.bus().subscribe_once(
        "daemon:ready",
        Arc::new(move |_| {
            let tx = Arc::clone(&tx);
            Box::pin(async move {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(());
                }
                Ok(())
            })
        }),
    );

    kernel.start(json!({})).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), rx)
        .await
        .expect("daemon:ready not published")
        .unwrap();
    kernel.stop().await.unwrap();
}

/// Plugin that checks its config slice and registers a gated RPC method.
#[derive(Debug)]
struct SlicePlugin {
    seen_slice: Arc<Mutex<Value>>,
}

#[async_trait]
impl Plugin for SlicePlugin {
    fn manifest(&self) -> PluginManifest {
        PluginManifest::new("slice", "1.0.0")
    }

    async fn install(&self, ctx: &PluginContext) -> Result<(), CoreError> {
        *self.seen_slice.lock() = ctx.plugin_config().clone();
        ctx.register_method(
            "slice.ping",
            Arc::new(|_params, _conn| Box::pin(async move { Ok(json!("pong")) })),
        )?;
        Ok(())
    }
}

#[tokio::test]
async fn plugin_sees_its_config_slice_and_methods_gate_on_ready() {
    let kernel = Kernel::new();
    let seen_slice = Arc::new(Mutex::new(Value::Null));
    kernel
        .register_plugin(Arc::new(SlicePlugin {
            seen_slice: Arc::clone(&seen_slice),
        }))
        .unwrap();

    let config = json!({"plugins": {"slice": {"answer": 42}}});
    kernel.start(config).await.unwrap();
    assert_eq!(*seen_slice.lock(), json!({"answer": 42}));

    // Ready: dispatch succeeds.
    let handler = kernel.methods().lookup("slice.ping").unwrap();
    assert_eq!(handler(json!(null), 0).await.unwrap(), json!("pong"));

    // After stop the plugin is no longer ready; dispatch is refused.
    kernel.stop().await.unwrap();
    let handler = kernel.methods().lookup("slice.ping").unwrap();
    let err = handler(json!(null), 0).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PluginInvalid);
}
