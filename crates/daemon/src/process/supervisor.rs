// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The supervisor: exclusive owner of the process table. Spawns children,
//! delivers stop signals with SIGKILL escalation, makes restart decisions,
//! and publishes lifecycle events on the bus.
//!
//! Exit handling is serialized through the table lock: a restart decision
//! completes before the next exit of the same process is handled.

use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::{json, Value};
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use od_core::{events, CoreError, ErrorCode, EventBus, ProcessConfig, ProcessInfo, ProcessStatus, RestartPolicy};

use super::record::{unix_ms, ChildRecord, ExitNotice, ProcessRecord};
use super::spawn;

/// Liveness poll interval during a stop.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The process table and everything that mutates it.
pub(crate) struct Supervisor {
    table: Mutex<HashMap<String, ProcessRecord>>,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
    bus: EventBus,
    /// Self-handle for watcher and restart tasks.
    me: Weak<Supervisor>,
}

impl Supervisor {
    pub fn new(bus: EventBus) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            table: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
            bus,
        })
    }

    /// Suppress restarts; used while the plugin itself is stopping.
    pub fn set_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub async fn list(&self) -> Vec<ProcessInfo> {
        let table = self.table.lock().await;
        let mut infos: Vec<ProcessInfo> = table.values().map(ProcessRecord::info).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub async fn info(&self, name: &str) -> Option<ProcessInfo> {
        let table = self.table.lock().await;
        table.get(name).map(ProcessRecord::info)
    }

    /// Start from a decoded config value (the RPC `start` entrypoint).
    pub async fn start_value(&self, value: Value) -> Result<ProcessInfo, CoreError> {
        let config: ProcessConfig = serde_json::from_value(value).map_err(|e| {
            CoreError::new(
                ErrorCode::ProcessInvalidConfig,
                format!("invalid process config: {e}"),
            )
        })?;
        self.start(config).await
    }

    /// Start a logical process: spawn one child (fork) or N indexed
    /// workers (cluster), optionally waiting for each child's ready
    /// signal.
    pub async fn start(&self, config: ProcessConfig) -> Result<ProcessInfo, CoreError> {
        if config.name.is_empty() {
            return Err(CoreError::new(
                ErrorCode::ProcessInvalidConfig,
                "process name must not be empty",
            ));
        }
        let script = spawn::resolve_script(&config)?;

        // Phase 1: claim or create the record.
        let generation = {
            let mut table = self.table.lock().await;
            match table.get_mut(&config.name) {
                Some(record)
                    if matches!(
                        record.status,
                        ProcessStatus::Online | ProcessStatus::Starting | ProcessStatus::Stopping
                    ) =>
                {
                    return Err(CoreError::new(
                        ErrorCode::ProcessAlreadyExists,
                        format!("process \"{}\" already exists", config.name),
                    )
                    .with_process(&config.name));
                }
                Some(record) => {
                    record.config = config.clone();
                    record.status = ProcessStatus::Starting;
                    record.children.clear();
                    record.generation += 1;
                    record.last_error = None;
                    record.generation
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let mut record = ProcessRecord::new(id, config.clone());
                    record.status = ProcessStatus::Starting;
                    record.generation = 1;
                    let generation = record.generation;
                    table.insert(config.name.clone(), record);
                    generation
                }
            }
        };

        // Phase 2: spawn children without holding the table lock.
        let total = config.child_count();
        let mut spawned: Vec<(usize, u32, Child)> = Vec::with_capacity(total);
        for index in 0..total {
            match spawn::launch(&config, &script, index, total).await {
                Ok((child, pid)) => spawned.push((index, pid, child)),
                Err(e) => {
                    for (_, _, mut child) in spawned {
                        let _ = child.start_kill();
                    }
                    self.mark_errored(&config.name, &e).await;
                    return Err(e);
                }
            }
        }

        // Phase 3: record the children and go online.
        let info = {
            let mut table = self.table.lock().await;
            let Some(record) = table.get_mut(&config.name) else {
                for (_, _, mut child) in spawned {
                    let _ = child.start_kill();
                }
                return Err(CoreError::new(
                    ErrorCode::ProcessStartFailed,
                    format!("process \"{}\" was deleted during start", config.name),
                )
                .with_process(&config.name));
            };
            if record.generation != generation {
                for (_, _, mut child) in spawned {
                    let _ = child.start_kill();
                }
                return Err(CoreError::new(
                    ErrorCode::ProcessStartFailed,
                    format!("start of \"{}\" was superseded", config.name),
                )
                .with_process(&config.name));
            }
            let mut watchers = Vec::with_capacity(spawned.len());
            for (index, pid, child) in spawned {
                record.children.insert(
                    index,
                    ChildRecord {
                        pid,
                        index,
                        started_at: Instant::now(),
                    },
                );
                watchers.push((index, pid, child));
            }
            record.status = ProcessStatus::Online;
            record.started_at = Some(Instant::now());
            record.started_at_ms = Some(unix_ms());
            let info = record.info();
            drop(table);
            for (index, pid, child) in watchers {
                self.watch_child(config.name.clone(), index, generation, pid, child);
            }
            info
        };

        info!(process = %config.name, pid = ?info.pid, instances = info.running_instances, "process started");
        self.bus.publish(
            events::PROCESS_STARTED,
            json!({"name": config.name, "pid": info.pid}),
        );
        Ok(info)
    }

    /// Stop a logical process: signal every child (SIGTERM by default),
    /// poll for exits, SIGKILL survivors after the budget. A no-op when
    /// already stopped or stopping.
    pub async fn stop(
        &self,
        name: &str,
        signal: Option<Signal>,
        timeout: Option<Duration>,
    ) -> Result<(), CoreError> {
        let (pids, budget) = {
            let mut table = self.table.lock().await;
            let Some(record) = table.get_mut(name) else {
                return Err(not_found(name));
            };
            if matches!(record.status, ProcessStatus::Stopped | ProcessStatus::Stopping) {
                return Ok(());
            }
            record.status = ProcessStatus::Stopping;
            // Exits from here on are planned; stale generation makes the
            // watchers' notices no-ops.
            record.generation += 1;
            let pids: Vec<u32> = record.children.values().map(|c| c.pid).collect();
            let budget =
                timeout.unwrap_or_else(|| Duration::from_millis(record.config.kill_timeout));
            (pids, budget)
        };

        let signal = signal.unwrap_or(Signal::SIGTERM);
        for pid in &pids {
            send_signal(*pid, signal);
        }

        // Poll every 100ms until every child is gone or the budget runs
        // out, then escalate.
        let deadline = Instant::now() + budget;
        loop {
            let survivors: Vec<u32> = pids.iter().copied().filter(|pid| pid_alive(*pid)).collect();
            if survivors.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                warn!(process = %name, survivors = survivors.len(), "kill timeout, escalating to SIGKILL");
                for pid in survivors {
                    send_signal(pid, Signal::SIGKILL);
                }
                break;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }

        {
            let mut table = self.table.lock().await;
            if let Some(record) = table.get_mut(name) {
                record.children.clear();
                record.status = ProcessStatus::Stopped;
                record.started_at = None;
            }
        }

        info!(process = %name, "process stopped");
        self.bus
            .publish(events::PROCESS_STOPPED, json!({"name": name}));
        Ok(())
    }

    /// Stop then start with the stored config; returns the new info.
    pub async fn restart(&self, name: &str) -> Result<ProcessInfo, CoreError> {
        let config = {
            let table = self.table.lock().await;
            table
                .get(name)
                .map(|record| record.config.clone())
                .ok_or_else(|| not_found(name))?
        };
        self.stop(name, None, None).await?;
        self.start(config).await
    }

    /// Stop if running, then remove the record.
    pub async fn delete(&self, name: &str) -> Result<(), CoreError> {
        let running = {
            let table = self.table.lock().await;
            let record = table.get(name).ok_or_else(|| not_found(name))?;
            matches!(
                record.status,
                ProcessStatus::Online | ProcessStatus::Starting
            )
        };
        if running {
            self.stop(name, None, None).await?;
        }
        let mut table = self.table.lock().await;
        table.remove(name);
        info!(process = %name, "process deleted");
        Ok(())
    }

    /// Stop every process concurrently (plugin shutdown path).
    pub async fn stop_all(&self, timeout: Duration) {
        self.set_shutting_down();
        let names: Vec<String> = {
            let table = self.table.lock().await;
            table.keys().cloned().collect()
        };
        let mut joins = tokio::task::JoinSet::new();
        for name in names {
            let Some(supervisor) = self.me.upgrade() else {
                continue;
            };
            joins.spawn(async move {
                if let Err(e) = supervisor.stop(&name, None, Some(timeout)).await {
                    warn!(process = %name, error = %e, "stop during shutdown failed");
                }
            });
        }
        while joins.join_next().await.is_some() {}
        self.table.lock().await.clear();
    }

    /// Spawn the watcher task that owns the child handle and reports its
    /// exit.
    fn watch_child(
        &self,
        name: String,
        index: usize,
        generation: u64,
        pid: u32,
        mut child: Child,
    ) {
        let Some(supervisor) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let (code, signal) = match child.wait().await {
                Ok(status) => (status.code(), status.signal()),
                Err(e) => {
                    warn!(process = %name, pid, error = %e, "wait on child failed");
                    (None, None)
                }
            };
            supervisor
                .handle_exit(ExitNotice {
                    name,
                    index,
                    pid,
                    generation,
                    code,
                    signal,
                })
                .await;
        });
    }

    /// Handle one child exit: drop the child record, consult the restart
    /// policy and budget, and either finalize or schedule a re-spawn.
    async fn handle_exit(&self, notice: ExitNotice) {
        let mut table = self.table.lock().await;
        let Some(record) = table.get_mut(&notice.name) else {
            return;
        };
        if record.generation != notice.generation {
            debug!(process = %notice.name, pid = notice.pid, "stale exit notice");
            return;
        }
        record.children.remove(&notice.index);
        info!(
            process = %notice.name,
            pid = notice.pid,
            code = ?notice.code,
            signal = ?notice.signal,
            "child exited"
        );

        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        let exit_data = json!({
            "name": notice.name,
            "code": notice.code,
            "signal": notice.signal,
        });

        let restart = match record.config.auto_restart {
            RestartPolicy::Never => false,
            RestartPolicy::OnFailure => notice.code != Some(0),
            // A stopping process never reaches this decision: stop()
            // advances the generation before signaling, so its exits fail
            // the staleness check above. unless-stopped restarts here.
            RestartPolicy::UnlessStopped | RestartPolicy::Always => true,
        };

        if !restart {
            if record.children.is_empty() {
                record.status = ProcessStatus::Stopped;
                record.started_at = None;
            }
            self.bus.publish(events::PROCESS_EXIT, exit_data);
            return;
        }

        if record.restart_count >= record.config.max_restarts {
            warn!(
                process = %notice.name,
                restarts = record.restart_count,
                "restart budget exhausted"
            );
            record.status = ProcessStatus::Errored;
            record.started_at = None;
            self.bus.publish(events::PROCESS_EXIT, exit_data);
            return;
        }

        record.restart_count += 1;
        record.status = ProcessStatus::Starting;
        let delay = Duration::from_millis(record.config.restart_delay);
        let generation = record.generation;
        drop(table);

        self.bus.publish(events::PROCESS_EXIT, exit_data);

        let Some(supervisor) = self.me.upgrade() else {
            return;
        };
        let name = notice.name;
        let index = notice.index;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            supervisor.respawn(&name, index, generation).await;
        });
    }

    /// Re-spawn one exited child. Cluster mode re-spawns only the exited
    /// worker index; fork mode the sole child.
    async fn respawn(&self, name: &str, index: usize, generation: u64) {
        let config = {
            let table = self.table.lock().await;
            let Some(record) = table.get(name) else {
                return;
            };
            if record.generation != generation
                || self.shutting_down.load(Ordering::SeqCst)
                || matches!(
                    record.status,
                    ProcessStatus::Stopping | ProcessStatus::Stopped
                )
            {
                return;
            }
            record.config.clone()
        };

        let total = config.child_count();
        let script = match spawn::resolve_script(&config) {
            Ok(script) => script,
            Err(e) => {
                error!(process = %name, error = %e, "re-spawn failed");
                self.mark_errored(name, &e).await;
                return;
            }
        };
        match spawn::launch(&config, &script, index, total).await {
            Ok((child, pid)) => {
                {
                    let mut table = self.table.lock().await;
                    let Some(record) = table.get_mut(name) else {
                        let mut child = child;
                        let _ = child.start_kill();
                        return;
                    };
                    if record.generation != generation {
                        let mut child = child;
                        let _ = child.start_kill();
                        return;
                    }
                    record.children.insert(
                        index,
                        ChildRecord {
                            pid,
                            index,
                            started_at: Instant::now(),
                        },
                    );
                    record.status = ProcessStatus::Online;
                }
                info!(process = %name, pid, worker = index, "child re-spawned");
                self.watch_child(name.to_string(), index, generation, pid, child);
                self.bus
                    .publish(events::PROCESS_STARTED, json!({"name": name, "pid": pid}));
            }
            Err(e) => {
                error!(process = %name, error = %e, "re-spawn failed");
                self.mark_errored(name, &e).await;
            }
        }
    }

    /// Mark a process errored and publish `process:error`.
    async fn mark_errored(&self, name: &str, error: &CoreError) {
        {
            let mut table = self.table.lock().await;
            if let Some(record) = table.get_mut(name) {
                record.status = ProcessStatus::Errored;
                record.started_at = None;
                record.last_error = Some(error.message.clone());
            }
        }
        self.bus.publish(
            events::PROCESS_ERROR,
            json!({"name": name, "message": error.message}),
        );
    }
}

fn not_found(name: &str) -> CoreError {
    CoreError::new(
        ErrorCode::ProcessNotFound,
        format!("no process named \"{name}\""),
    )
    .with_process(name)
}

fn send_signal(pid: u32, signal: Signal) {
    if let Err(e) = kill(Pid::from_raw(pid as i32), signal) {
        debug!(pid, signal = %signal, error = %e, "signal delivery failed");
    }
}

/// Signal-0 liveness probe. A reaped pid reads as dead; an exited but
/// not-yet-reaped child still reads alive, which the poll loop tolerates.
fn pid_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
