// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-manager bookkeeping types.

use std::collections::HashMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use od_core::{ProcessConfig, ProcessInfo, ProcessStatus};

/// Wall-clock now in unix milliseconds.
pub(crate) fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// One OS child of a logical process. The spawned handle itself is owned by
/// the child's watcher task; the pid here is a weak reference for
/// observers and signal delivery.
#[derive(Debug, Clone)]
pub(crate) struct ChildRecord {
    pub pid: u32,
    pub index: usize,
    #[allow(dead_code)]
    pub started_at: Instant,
}

/// Exit report delivered by a child's watcher task.
#[derive(Debug, Clone)]
pub(crate) struct ExitNotice {
    pub name: String,
    pub index: usize,
    pub pid: u32,
    /// Record generation at spawn time; stale notices are ignored.
    pub generation: u64,
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// State of one logical process. Owned exclusively by the supervisor.
pub(crate) struct ProcessRecord {
    pub id: u64,
    pub config: ProcessConfig,
    pub status: ProcessStatus,
    pub children: HashMap<usize, ChildRecord>,
    pub restart_count: u32,
    /// Bumped on every explicit start/stop so exit notices from a previous
    /// incarnation are recognized as stale.
    pub generation: u64,
    pub created_at_ms: u64,
    pub started_at_ms: Option<u64>,
    pub started_at: Option<Instant>,
    pub last_error: Option<String>,
}

impl ProcessRecord {
    pub fn new(id: u64, config: ProcessConfig) -> Self {
        Self {
            id,
            config,
            status: ProcessStatus::Created,
            children: HashMap::new(),
            restart_count: 0,
            generation: 0,
            created_at_ms: unix_ms(),
            started_at_ms: None,
            started_at: None,
            last_error: None,
        }
    }

    /// The info DTO served over RPC.
    pub fn info(&self) -> ProcessInfo {
        let mut pids: Vec<(usize, u32)> =
            self.children.values().map(|c| (c.index, c.pid)).collect();
        pids.sort_by_key(|(index, _)| *index);
        let pid = pids.first().map(|(_, pid)| *pid);
        let uptime = match (self.status, self.started_at) {
            (ProcessStatus::Online, Some(at)) => at.elapsed().as_secs(),
            _ => 0,
        };
        ProcessInfo {
            id: self.id,
            name: self.config.name.clone(),
            status: self.status,
            mode: self.config.mode,
            instances: self.config.child_count(),
            running_instances: self.children.len(),
            pid,
            pids: pids.into_iter().map(|(_, pid)| pid).collect(),
            restart_count: self.restart_count,
            uptime,
            script: self.config.script.clone(),
            cwd: self.config.cwd.clone(),
            created_at: self.created_at_ms,
            started_at: self.started_at_ms,
        }
    }
}
