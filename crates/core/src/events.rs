// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical bus event names.
//!
//! Every event published by the kernel or the built-in plugins uses one of
//! these constants; ad-hoc strings are reserved for user plugins.

/// Kernel finished startup and is serving RPC.
pub const DAEMON_READY: &str = "daemon:ready";

/// Kernel finished graceful shutdown.
pub const DAEMON_STOPPED: &str = "daemon:stopped";

/// A logical process reached `online`. Data: `{name, pid}`.
pub const PROCESS_STARTED: &str = "process:started";

/// A logical process was stopped deliberately. Data: `{name}`.
pub const PROCESS_STOPPED: &str = "process:stopped";

/// A child exited and no restart follows. Data: `{name, code, signal}`.
pub const PROCESS_EXIT: &str = "process:exit";

/// A spawn or re-spawn failed. Data: `{name, message}`.
pub const PROCESS_ERROR: &str = "process:error";

/// A plugin's health probe returned false. Data: `{name}`.
pub const PLUGIN_UNHEALTHY: &str = "plugin:unhealthy";

/// The config-manager validated a configuration. Data: `{config}`.
pub const CONFIG_LOADED: &str = "config:loaded";
