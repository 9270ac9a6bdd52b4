// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the daemon.
//!
//! Every user-visible failure carries a stable kebab-case code plus a human
//! message. Contextual fields (process name, plugin name, path) ride along so
//! the CLI can render them without parsing the message.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Stable machine-readable error codes.
///
/// The kebab-case form (`as_str`) is what travels over the wire and what the
/// CLI matches on; the enum exists so handler code cannot invent codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    DaemonNotRunning,
    DaemonAlreadyRunning,
    ProcessNotFound,
    ProcessAlreadyExists,
    ProcessStartFailed,
    ProcessStopFailed,
    ProcessInvalidConfig,
    ConfigNotFound,
    ConfigInvalid,
    ConfigValidation,
    ConfigParse,
    PluginNotFound,
    PluginAlreadyRegistered,
    PluginMissingDependency,
    PluginCircularDependency,
    PluginConflict,
    PluginInvalid,
    PluginInitializationFailed,
    HealthCheckFailed,
    HealthCheckTimeout,
    TransportTimeout,
    TransportError,
    ConnectionRefused,
    MessageTooLarge,
    Timeout,
    InvalidArgument,
    Unknown,
}

impl ErrorCode {
    /// The kebab-case wire form of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::DaemonNotRunning => "daemon-not-running",
            ErrorCode::DaemonAlreadyRunning => "daemon-already-running",
            ErrorCode::ProcessNotFound => "process-not-found",
            ErrorCode::ProcessAlreadyExists => "process-already-exists",
            ErrorCode::ProcessStartFailed => "process-start-failed",
            ErrorCode::ProcessStopFailed => "process-stop-failed",
            ErrorCode::ProcessInvalidConfig => "process-invalid-config",
            ErrorCode::ConfigNotFound => "config-not-found",
            ErrorCode::ConfigInvalid => "config-invalid",
            ErrorCode::ConfigValidation => "config-validation",
            ErrorCode::ConfigParse => "config-parse",
            ErrorCode::PluginNotFound => "plugin-not-found",
            ErrorCode::PluginAlreadyRegistered => "plugin-already-registered",
            ErrorCode::PluginMissingDependency => "plugin-missing-dependency",
            ErrorCode::PluginCircularDependency => "plugin-circular-dependency",
            ErrorCode::PluginConflict => "plugin-conflict",
            ErrorCode::PluginInvalid => "plugin-invalid",
            ErrorCode::PluginInitializationFailed => "plugin-initialization-failed",
            ErrorCode::HealthCheckFailed => "health-check-failed",
            ErrorCode::HealthCheckTimeout => "health-check-timeout",
            ErrorCode::TransportTimeout => "transport-timeout",
            ErrorCode::TransportError => "transport-error",
            ErrorCode::ConnectionRefused => "connection-refused",
            ErrorCode::MessageTooLarge => "message-too-large",
            ErrorCode::Timeout => "timeout",
            ErrorCode::InvalidArgument => "invalid-argument",
            ErrorCode::Unknown => "unknown",
        }
    }

    /// Parse the kebab-case wire form back into a code.
    ///
    /// Unrecognized codes collapse to [`ErrorCode::Unknown`] so that a newer
    /// daemon never makes an older CLI fail to decode an error.
    pub fn parse(s: &str) -> Self {
        match s {
            "daemon-not-running" => ErrorCode::DaemonNotRunning,
            "daemon-already-running" => ErrorCode::DaemonAlreadyRunning,
            "process-not-found" => ErrorCode::ProcessNotFound,
            "process-already-exists" => ErrorCode::ProcessAlreadyExists,
            "process-start-failed" => ErrorCode::ProcessStartFailed,
            "process-stop-failed" => ErrorCode::ProcessStopFailed,
            "process-invalid-config" => ErrorCode::ProcessInvalidConfig,
            "config-not-found" => ErrorCode::ConfigNotFound,
            "config-invalid" => ErrorCode::ConfigInvalid,
            "config-validation" => ErrorCode::ConfigValidation,
            "config-parse" => ErrorCode::ConfigParse,
            "plugin-not-found" => ErrorCode::PluginNotFound,
            "plugin-already-registered" => ErrorCode::PluginAlreadyRegistered,
            "plugin-missing-dependency" => ErrorCode::PluginMissingDependency,
            "plugin-circular-dependency" => ErrorCode::PluginCircularDependency,
            "plugin-conflict" => ErrorCode::PluginConflict,
            "plugin-invalid" => ErrorCode::PluginInvalid,
            "plugin-initialization-failed" => ErrorCode::PluginInitializationFailed,
            "health-check-failed" => ErrorCode::HealthCheckFailed,
            "health-check-timeout" => ErrorCode::HealthCheckTimeout,
            "transport-timeout" => ErrorCode::TransportTimeout,
            "transport-error" => ErrorCode::TransportError,
            "connection-refused" => ErrorCode::ConnectionRefused,
            "message-too-large" => ErrorCode::MessageTooLarge,
            "timeout" => ErrorCode::Timeout,
            "invalid-argument" => ErrorCode::InvalidArgument,
            _ => ErrorCode::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contextual fields attached to an error where applicable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl ErrorContext {
    fn is_empty(&self) -> bool {
        self.process.is_none() && self.plugin.is_none() && self.path.is_none()
    }
}

/// A coded error with a human message and optional context.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct CoreError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "ErrorContext::is_empty")]
    pub context: ErrorContext,
}

impl CoreError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn with_process(mut self, name: impl Into<String>) -> Self {
        self.context.process = Some(name.into());
        self
    }

    pub fn with_plugin(mut self, name: impl Into<String>) -> Self {
        self.context.plugin = Some(name.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.context.path = Some(path.into());
        self
    }

    /// Shorthand for a [`ErrorCode::Timeout`] error.
    pub fn timeout(what: impl fmt::Display, after: std::time::Duration) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("{} timed out after {:.1}s", what, after.as_secs_f64()),
        )
    }

    /// Shorthand for a [`ErrorCode::InvalidArgument`] error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
