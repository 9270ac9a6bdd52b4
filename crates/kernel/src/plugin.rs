// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The plugin capability set.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use od_core::CoreError;

use crate::context::PluginContext;

/// Default priority when a manifest does not override it. Lower loads
/// earlier among plugins the dependency order leaves unordered.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Static plugin metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    pub priority: i32,
    pub dependencies: Vec<String>,
    pub conflicts: Vec<String>,
}

impl PluginManifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            priority: DEFAULT_PRIORITY,
            dependencies: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    pub fn with_conflict(mut self, name: impl Into<String>) -> Self {
        self.conflicts.push(name.into());
        self
    }
}

/// Lifecycle phase of a registered plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginPhase {
    #[default]
    Registered,
    Installing,
    Installed,
    Starting,
    Ready,
    Stopping,
    Stopped,
}

/// A plugin hosted by the kernel.
///
/// `install` is the only mandatory hook; the rest default to no-ops. A
/// plugin that wants the watchdog to poll it overrides
/// `provides_health_check` alongside `health_check`.
#[async_trait]
pub trait Plugin: Send + Sync + std::fmt::Debug {
    fn manifest(&self) -> PluginManifest;

    async fn install(&self, ctx: &PluginContext) -> Result<(), CoreError>;

    async fn on_start(&self, _ctx: &PluginContext) -> Result<(), CoreError> {
        Ok(())
    }

    async fn on_ready(&self, _ctx: &PluginContext) -> Result<(), CoreError> {
        Ok(())
    }

    async fn on_stop(&self, _ctx: &PluginContext) -> Result<(), CoreError> {
        Ok(())
    }

    async fn on_error(&self, _ctx: &PluginContext, _error: &CoreError) {}

    fn provides_health_check(&self) -> bool {
        false
    }

    async fn health_check(&self, _ctx: &PluginContext) -> Result<bool, CoreError> {
        Ok(true)
    }
}
