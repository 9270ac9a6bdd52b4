// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration: shape, defaults, validation and merging.
//!
//! The daemon consumes an already-decoded JSON value; discovering and
//! parsing richer file formats is a front-end concern. Validation checks
//! only what the core needs (`apps` is a list, every entry has `name` and
//! `script`); unknown fields pass through untouched.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, ErrorCode};
use crate::process::ProcessConfig;

/// Default control socket path.
pub const DEFAULT_SOCKET_PATH: &str = "./opendaemon.sock";
/// Default PID file path.
pub const DEFAULT_PID_FILE: &str = "./opendaemon.pid";
/// Default log directory.
pub const DEFAULT_LOG_DIR: &str = "./logs";
/// Default bound on plugin install/stop hooks.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

fn default_pid_file() -> PathBuf {
    PathBuf::from(DEFAULT_PID_FILE)
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_DIR)
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_shutdown_timeout() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

/// The `daemon` section of the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonSection {
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            log_dir: default_log_dir(),
            socket_path: default_socket_path(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

/// Decoded top-level configuration shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub daemon: DaemonSection,
    /// Process-config fragment merged under every app entry.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub defaults: Value,
    #[serde(default)]
    pub apps: Vec<Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub plugins: HashMap<String, Value>,
}

/// Validated configuration: the daemon section plus app entries already
/// merged onto `defaults`, each proven to decode into a [`ProcessConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedConfig {
    pub daemon: DaemonSection,
    /// Merged app entries, unknown fields preserved.
    pub apps: Vec<Value>,
    pub plugins: HashMap<String, Value>,
}

impl ValidatedConfig {
    /// Decode the merged app entries into process configs.
    pub fn process_configs(&self) -> Result<Vec<ProcessConfig>, CoreError> {
        self.apps
            .iter()
            .map(|app| {
                serde_json::from_value(app.clone()).map_err(|e| {
                    CoreError::new(
                        ErrorCode::ConfigValidation,
                        format!("invalid app entry: {e}"),
                    )
                })
            })
            .collect()
    }
}

/// Shallow-merge `entry` onto `defaults`: both must be JSON objects (or
/// null); keys in `entry` win.
pub fn merge_defaults(defaults: &Value, entry: &Value) -> Value {
    let mut merged: Map<String, Value> = match defaults {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Value::Object(map) = entry {
        for (k, v) in map {
            merged.insert(k.clone(), v.clone());
        }
    }
    Value::Object(merged)
}

/// Validate a decoded configuration value.
///
/// Checks that `apps` is a list whose entries each carry a non-empty `name`
/// and a `script`, merges every entry onto `defaults`, and confirms the
/// merged entry decodes into a [`ProcessConfig`]. Unknown fields are kept.
pub fn validate(value: &Value) -> Result<ValidatedConfig, CoreError> {
    if !value.is_object() && !value.is_null() {
        return Err(CoreError::new(
            ErrorCode::ConfigInvalid,
            "configuration must be an object",
        ));
    }

    let config: DaemonConfig = if value.is_null() {
        DaemonConfig::default()
    } else {
        serde_json::from_value(value.clone()).map_err(|e| {
            CoreError::new(ErrorCode::ConfigInvalid, format!("bad configuration: {e}"))
        })?
    };

    let mut apps = Vec::with_capacity(config.apps.len());
    for (i, entry) in config.apps.iter().enumerate() {
        let Value::Object(_) = entry else {
            return Err(CoreError::new(
                ErrorCode::ConfigValidation,
                format!("apps[{i}] must be an object"),
            ));
        };
        let merged = merge_defaults(&config.defaults, entry);

        let name = merged.get("name").and_then(Value::as_str).unwrap_or("");
        if name.is_empty() {
            return Err(CoreError::new(
                ErrorCode::ConfigValidation,
                format!("apps[{i}] is missing \"name\""),
            ));
        }
        if merged.get("script").and_then(Value::as_str).is_none() {
            return Err(CoreError::new(
                ErrorCode::ConfigValidation,
                format!("app \"{name}\" is missing \"script\""),
            )
            .with_process(name));
        }

        // Prove the merged entry decodes; keep the raw value (with any
        // unknown fields) as the stored form.
        let _: ProcessConfig = serde_json::from_value(merged.clone()).map_err(|e| {
            CoreError::new(
                ErrorCode::ConfigValidation,
                format!("app \"{name}\": {e}"),
            )
            .with_process(name)
        })?;

        apps.push(merged);
    }

    Ok(ValidatedConfig {
        daemon: config.daemon,
        apps,
        plugins: config.plugins,
    })
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
