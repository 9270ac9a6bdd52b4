// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child spawning: command construction, environment merge, ready-signal
//! wait, and output draining.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, warn};

use od_core::{CoreError, ErrorCode, ExecMode, ProcessConfig};

/// Reserved environment variables injected into cluster workers.
pub(crate) const WORKER_INDEX_VAR: &str = "WORKER_INDEX";
pub(crate) const WORKER_COUNT_VAR: &str = "WORKER_COUNT";

/// Resolve the configured script to an absolute existing path.
///
/// Relative scripts resolve against the configured cwd, falling back to the
/// daemon's cwd.
pub(crate) fn resolve_script(config: &ProcessConfig) -> Result<PathBuf, CoreError> {
    let joined = if config.script.is_absolute() {
        config.script.clone()
    } else {
        let base = match &config.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir().map_err(|e| {
                CoreError::new(ErrorCode::ProcessInvalidConfig, format!("cwd unavailable: {e}"))
            })?,
        };
        base.join(&config.script)
    };
    joined.canonicalize().map_err(|_| {
        CoreError::new(
            ErrorCode::ProcessInvalidConfig,
            format!("script not found: {}", joined.display()),
        )
        .with_process(&config.name)
        .with_path(joined.clone())
    })
}

/// Build the command for one child.
///
/// Environment: the daemon's environment is inherited, the config's `env`
/// map layered on top, and cluster workers additionally get
/// `WORKER_INDEX` / `WORKER_COUNT`.
fn build_command(config: &ProcessConfig, script: &Path, index: usize, total: usize) -> Command {
    let mut cmd = match &config.interpreter {
        Some(interpreter) => {
            let mut cmd = Command::new(interpreter);
            cmd.arg(script);
            cmd
        }
        None => Command::new(script),
    };
    cmd.args(&config.args);

    let cwd = config
        .cwd
        .clone()
        .or_else(|| script.parent().map(Path::to_path_buf));
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }

    cmd.envs(&config.env);
    if config.mode == ExecMode::Cluster {
        cmd.env(WORKER_INDEX_VAR, index.to_string());
        cmd.env(WORKER_COUNT_VAR, total.to_string());
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

/// Whether a child message is the ready signal: the literal `ready`, or a
/// JSON object `{"type": "ready"}`.
pub(crate) fn is_ready_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed == "ready" {
        return true;
    }
    serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str().map(|t| t == "ready")))
        .unwrap_or(false)
}

/// Spawn one child for `config` and, when `min_uptime` is set, wait up to
/// that many milliseconds for its ready signal on stdout. Remaining output
/// is drained into the log.
pub(crate) async fn launch(
    config: &ProcessConfig,
    script: &Path,
    index: usize,
    total: usize,
) -> Result<(Child, u32), CoreError> {
    let mut child = build_command(config, script, index, total).spawn().map_err(|e| {
        CoreError::new(
            ErrorCode::ProcessStartFailed,
            format!("failed to spawn \"{}\": {e}", config.name),
        )
        .with_process(&config.name)
        .with_path(script)
    })?;

    let pid = child.id().ok_or_else(|| {
        CoreError::new(
            ErrorCode::ProcessStartFailed,
            format!("child of \"{}\" exited during spawn", config.name),
        )
        .with_process(&config.name)
    })?;

    let stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
    let stderr = child.stderr.take();

    let mut stdout = stdout;
    if let Some(wait_ms) = config.min_uptime {
        match stdout.as_mut() {
            Some(lines) => {
                if let Err(e) = wait_ready(lines, &config.name, wait_ms).await {
                    let _ = child.start_kill();
                    return Err(e);
                }
            }
            None => {
                let _ = child.start_kill();
                return Err(CoreError::new(
                    ErrorCode::ProcessStartFailed,
                    format!("stdout of \"{}\" unavailable for ready wait", config.name),
                )
                .with_process(&config.name));
            }
        }
    }

    if let Some(lines) = stdout {
        drain_stdout(lines, config.name.clone(), index);
    }
    if let Some(stderr) = stderr {
        drain_stderr(stderr, config.name.clone(), index);
    }

    Ok((child, pid))
}

/// Read stdout lines until the ready signal arrives or the budget expires.
/// Non-ready messages do not complete the wait.
async fn wait_ready(
    lines: &mut Lines<BufReader<ChildStdout>>,
    name: &str,
    wait_ms: u64,
) -> Result<(), CoreError> {
    let deadline = Instant::now() + Duration::from_millis(wait_ms);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ready_timeout(name, wait_ms));
        }
        match tokio::time::timeout(remaining, lines.next_line()).await {
            Err(_) => return Err(ready_timeout(name, wait_ms)),
            Ok(Err(e)) => {
                return Err(CoreError::new(
                    ErrorCode::ProcessStartFailed,
                    format!("reading ready signal from \"{name}\" failed: {e}"),
                )
                .with_process(name));
            }
            Ok(Ok(None)) => {
                return Err(CoreError::new(
                    ErrorCode::ProcessStartFailed,
                    format!("\"{name}\" exited before signaling ready"),
                )
                .with_process(name));
            }
            Ok(Ok(Some(line))) => {
                if is_ready_line(&line) {
                    return Ok(());
                }
                debug!(process = %name, "pre-ready output: {line}");
            }
        }
    }
}

fn ready_timeout(name: &str, wait_ms: u64) -> CoreError {
    CoreError::new(
        ErrorCode::ProcessStartFailed,
        format!("\"{name}\" did not signal ready within {wait_ms}ms"),
    )
    .with_process(name)
}

fn drain_stdout(mut lines: Lines<BufReader<ChildStdout>>, name: String, index: usize) {
    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(process = %name, worker = index, "stdout: {line}");
        }
    });
}

fn drain_stderr(stderr: ChildStderr, name: String, index: usize) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            warn!(process = %name, worker = index, "stderr: {line}");
        }
    });
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
