// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plugin registry and dependency-ordered load resolution.
//!
//! The registry holds one record per plugin: the plugin value, its
//! manifest, its lifecycle phase, and the last error it produced.
//! `resolve_load_order` topologically sorts the dependency DAG
//! (dependencies first), then stable-sorts by ascending priority so that
//! ties fall back to topological order, which itself preserves
//! registration order. The result is deterministic for identical input.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use od_core::{CoreError, ErrorCode};

use crate::plugin::{Plugin, PluginManifest, PluginPhase};

/// One registered plugin.
pub struct PluginRecord {
    pub plugin: Arc<dyn Plugin>,
    pub manifest: PluginManifest,
    pub phase: PluginPhase,
    pub last_error: Option<CoreError>,
}

/// Registry of plugins, in registration order.
#[derive(Default)]
pub struct PluginRegistry {
    records: IndexMap<String, PluginRecord>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Rejects empty name/version, duplicates, and
    /// conflicts in either direction.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), CoreError> {
        let manifest = plugin.manifest();
        if manifest.name.is_empty() {
            return Err(CoreError::new(
                ErrorCode::PluginInvalid,
                "plugin name must not be empty",
            ));
        }
        if manifest.version.is_empty() {
            return Err(CoreError::new(
                ErrorCode::PluginInvalid,
                format!("plugin \"{}\" has an empty version", manifest.name),
            )
            .with_plugin(&manifest.name));
        }
        if self.records.contains_key(&manifest.name) {
            return Err(CoreError::new(
                ErrorCode::PluginAlreadyRegistered,
                format!("plugin already registered: {}", manifest.name),
            )
            .with_plugin(&manifest.name));
        }
        for record in self.records.values() {
            let existing = &record.manifest;
            if manifest.conflicts.contains(&existing.name) {
                return Err(conflict_error(&manifest.name, &existing.name));
            }
            if existing.conflicts.contains(&manifest.name) {
                return Err(conflict_error(&existing.name, &manifest.name));
            }
        }

        self.records.insert(
            manifest.name.clone(),
            PluginRecord {
                plugin,
                manifest,
                phase: PluginPhase::Registered,
                last_error: None,
            },
        );
        Ok(())
    }

    /// Remove a plugin. Fails if any registered plugin depends on it.
    pub fn unregister(&mut self, name: &str) -> Result<Arc<dyn Plugin>, CoreError> {
        if !self.records.contains_key(name) {
            return Err(CoreError::new(
                ErrorCode::PluginNotFound,
                format!("plugin not found: {name}"),
            )
            .with_plugin(name));
        }
        for record in self.records.values() {
            if record.manifest.dependencies.iter().any(|d| d == name) {
                return Err(CoreError::new(
                    ErrorCode::PluginMissingDependency,
                    format!(
                        "cannot unregister \"{name}\": \"{}\" depends on it",
                        record.manifest.name
                    ),
                )
                .with_plugin(name));
            }
        }
        self.records
            .shift_remove(name)
            .map(|r| r.plugin)
            .ok_or_else(|| {
                CoreError::new(ErrorCode::PluginNotFound, format!("plugin not found: {name}"))
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.records.get(name).map(|r| Arc::clone(&r.plugin))
    }

    pub fn phase(&self, name: &str) -> Option<PluginPhase> {
        self.records.get(name).map(|r| r.phase)
    }

    pub fn set_phase(&mut self, name: &str, phase: PluginPhase) {
        if let Some(record) = self.records.get_mut(name) {
            record.phase = phase;
        }
    }

    pub fn set_last_error(&mut self, name: &str, error: CoreError) {
        if let Some(record) = self.records.get_mut(name) {
            record.last_error = Some(error);
        }
    }

    pub fn last_error(&self, name: &str) -> Option<CoreError> {
        self.records.get(name).and_then(|r| r.last_error.clone())
    }

    pub fn manifest(&self, name: &str) -> Option<&PluginManifest> {
        self.records.get(name).map(|r| &r.manifest)
    }

    /// Plugin names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    /// Names of plugins currently in the given phase, registration order.
    pub fn names_in_phase(&self, phase: PluginPhase) -> Vec<String> {
        self.records
            .values()
            .filter(|r| r.phase == phase)
            .map(|r| r.manifest.name.clone())
            .collect()
    }

    /// Resolve the install/start order.
    ///
    /// 1. Every declared dependency must be registered.
    /// 2. Topological sort (dependencies first); a cycle fails with
    ///    `plugin-circular-dependency` and mutates nothing.
    /// 3. Stable sort by ascending priority; ties keep topological order.
    pub fn resolve_load_order(&self) -> Result<Vec<String>, CoreError> {
        for record in self.records.values() {
            for dep in &record.manifest.dependencies {
                if !self.records.contains_key(dep) {
                    return Err(CoreError::new(
                        ErrorCode::PluginMissingDependency,
                        format!(
                            "plugin \"{}\" depends on unregistered \"{dep}\"",
                            record.manifest.name
                        ),
                    )
                    .with_plugin(&record.manifest.name));
                }
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            OnStack,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut order: Vec<String> = Vec::with_capacity(self.records.len());

        // Iterative DFS; a node re-entered while still on the stack is a
        // cycle.
        for start in self.records.keys() {
            if marks.contains_key(start.as_str()) {
                continue;
            }
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            marks.insert(start.as_str(), Mark::OnStack);
            while let Some((name, next_dep)) = stack.pop() {
                let deps = self
                    .records
                    .get(name)
                    .map(|r| &r.manifest.dependencies)
                    .ok_or_else(|| {
                        CoreError::new(ErrorCode::PluginNotFound, format!("plugin not found: {name}"))
                    })?;
                if next_dep < deps.len() {
                    stack.push((name, next_dep + 1));
                    let dep = deps[next_dep].as_str();
                    match marks.get(dep) {
                        Some(Mark::OnStack) => {
                            return Err(CoreError::new(
                                ErrorCode::PluginCircularDependency,
                                format!("circular dependency involving \"{name}\""),
                            )
                            .with_plugin(name));
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(dep, Mark::OnStack);
                            stack.push((dep, 0));
                        }
                    }
                } else {
                    marks.insert(name, Mark::Done);
                    order.push(name.to_string());
                }
            }
        }

        // Stable: equal priorities keep topological (and thus
        // registration) order.
        let mut ordered = order;
        ordered.sort_by_key(|name| {
            self.records
                .get(name)
                .map(|r| r.manifest.priority)
                .unwrap_or(i32::MAX)
        });
        Ok(ordered)
    }
}

fn conflict_error(declaring: &str, other: &str) -> CoreError {
    CoreError::new(
        ErrorCode::PluginConflict,
        format!("plugin \"{declaring}\" conflicts with \"{other}\""),
    )
    .with_plugin(declaring)
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
