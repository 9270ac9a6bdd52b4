// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle plumbing: PID-file mutual exclusion and log rotation.
//!
//! The PID file is the sole single-host mutual-exclusion mechanism: if the
//! file names a live pid the daemon refuses to start and leaves the file
//! untouched; otherwise it is overwritten with our pid and removed again on
//! graceful shutdown.

use std::io::Write;
use std::path::{Path, PathBuf};

use nix::sys::signal::kill;
use nix::unistd::Pid;
use thiserror::Error;

use od_core::ErrorCode;

/// Lifecycle errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("daemon already running (pid {pid})")]
    AlreadyRunning { pid: i32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LifecycleError {
    pub fn code(&self) -> ErrorCode {
        match self {
            LifecycleError::AlreadyRunning { .. } => ErrorCode::DaemonAlreadyRunning,
            LifecycleError::Io(_) => ErrorCode::Unknown,
        }
    }
}

/// Whether `pid` names a live process (signal 0 probe).
pub fn pid_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

/// A claimed PID file; remove with [`PidFile::remove`] on graceful
/// shutdown.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Claim `path` for this process.
    ///
    /// If the file exists and names a live pid, fails with
    /// `daemon-already-running` and leaves the file untouched. A stale file
    /// (dead pid, or unparseable contents) is overwritten.
    pub fn claim(path: &Path) -> Result<Self, LifecycleError> {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if let Ok(pid) = contents.trim().parse::<i32>() {
                if pid_alive(pid) {
                    return Err(LifecycleError::AlreadyRunning { pid });
                }
            }
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Remove the PID file. Failures are ignored; the next daemon treats a
    /// leftover file naming a dead pid as stale.
    pub fn remove(self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Maximum log file size before rotation (10 MiB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep.
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the daemon log file if it exceeds [`MAX_LOG_SIZE`].
///
/// Shifts `daemon.log` → `daemon.log.1` → `daemon.log.2` → `daemon.log.3`,
/// deleting the oldest. Best-effort: rotation failures are silently ignored
/// so the daemon still starts.
pub fn rotate_log_if_needed(log_path: &Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };

    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();

    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
