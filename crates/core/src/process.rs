// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Data model for supervised processes: configuration, observable status,
//! and the info DTO returned over RPC.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

/// Execution mode of a logical process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    #[default]
    Fork,
    Cluster,
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecMode::Fork => f.write_str("fork"),
            ExecMode::Cluster => f.write_str("cluster"),
        }
    }
}

/// Externally observable status of a logical process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    #[default]
    Created,
    Starting,
    Online,
    Stopping,
    Stopped,
    Errored,
}

impl ProcessStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessStatus::Created => "created",
            ProcessStatus::Starting => "starting",
            ProcessStatus::Online => "online",
            ProcessStatus::Stopping => "stopping",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Errored => "errored",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Restart policy for unplanned exits.
///
/// Accepts either a policy name or a boolean in configuration: `true` is
/// `always`, `false` is `never`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFailure,
    UnlessStopped,
    Never,
}

impl<'de> Deserialize<'de> for RestartPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PolicyVisitor;

        impl Visitor<'_> for PolicyVisitor {
            type Value = RestartPolicy;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a restart policy name or a boolean")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(if v {
                    RestartPolicy::Always
                } else {
                    RestartPolicy::Never
                })
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                match v {
                    "always" => Ok(RestartPolicy::Always),
                    "on-failure" => Ok(RestartPolicy::OnFailure),
                    "unless-stopped" => Ok(RestartPolicy::UnlessStopped),
                    "never" => Ok(RestartPolicy::Never),
                    other => Err(E::unknown_variant(
                        other,
                        &["always", "on-failure", "unless-stopped", "never"],
                    )),
                }
            }
        }

        deserializer.deserialize_any(PolicyVisitor)
    }
}

/// Desired instance count: a number, or the `"max"` sentinel which resolves
/// to the host's available parallelism at spawn time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instances {
    Count(u32),
    Max,
}

impl Default for Instances {
    fn default() -> Self {
        Instances::Count(1)
    }
}

impl Instances {
    /// Resolve to a concrete count, never less than 1.
    pub fn resolve(self) -> usize {
        match self {
            Instances::Count(n) => n.max(1) as usize,
            Instances::Max => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl Serialize for Instances {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Instances::Count(n) => serializer.serialize_u32(*n),
            Instances::Max => serializer.serialize_str("max"),
        }
    }
}

impl<'de> Deserialize<'de> for Instances {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct InstancesVisitor;

        impl Visitor<'_> for InstancesVisitor {
            type Value = Instances;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an integer >= 1 or the string \"max\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                if v == 0 || v > u64::from(u32::MAX) {
                    return Err(E::custom(format!("instances out of range: {v}")));
                }
                Ok(Instances::Count(v as u32))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map_err(|_| E::custom(format!("instances out of range: {v}")))
                    .and_then(|v| self.visit_u64(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                if v == "max" {
                    Ok(Instances::Max)
                } else {
                    Err(E::custom(format!("expected \"max\", got \"{v}\"")))
                }
            }
        }

        deserializer.deserialize_any(InstancesVisitor)
    }
}

/// Default restart delay between an unplanned exit and the re-spawn.
pub const DEFAULT_RESTART_DELAY_MS: u64 = 1_000;
/// Default cap on unplanned-exit restarts.
pub const DEFAULT_MAX_RESTARTS: u32 = 10;
/// Default budget for a stop before escalating to SIGKILL.
pub const DEFAULT_KILL_TIMEOUT_MS: u64 = 5_000;

fn default_restart_delay() -> u64 {
    DEFAULT_RESTART_DELAY_MS
}

fn default_max_restarts() -> u32 {
    DEFAULT_MAX_RESTARTS
}

fn default_kill_timeout() -> u64 {
    DEFAULT_KILL_TIMEOUT_MS
}

/// Configuration of one logical process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfig {
    pub name: String,
    pub script: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<PathBuf>,
    #[serde(default)]
    pub mode: ExecMode,
    #[serde(default)]
    pub instances: Instances,
    #[serde(default)]
    pub auto_restart: RestartPolicy,
    /// Milliseconds between an unplanned exit and the re-spawn.
    #[serde(default = "default_restart_delay")]
    pub restart_delay: u64,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Milliseconds to wait for the child's ready signal; no wait when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_uptime: Option<u64>,
    /// Milliseconds before a stop escalates to SIGKILL.
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout: u64,
}

impl ProcessConfig {
    /// Number of children this config asks for: 1 in fork mode, the
    /// resolved instance count in cluster mode.
    pub fn child_count(&self) -> usize {
        match self.mode {
            ExecMode::Fork => 1,
            ExecMode::Cluster => self.instances.resolve(),
        }
    }
}

/// Process info DTO returned by `list` / `info` / `start` / `restart`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub id: u64,
    pub name: String,
    pub status: ProcessStatus,
    pub mode: ExecMode,
    pub instances: usize,
    pub running_instances: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub pids: Vec<u32>,
    pub restart_count: u32,
    /// Seconds since the process last reached `online`; 0 when not running.
    pub uptime: u64,
    pub script: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Unix milliseconds when the record was created.
    pub created_at: u64,
    /// Unix milliseconds of the last successful start, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
