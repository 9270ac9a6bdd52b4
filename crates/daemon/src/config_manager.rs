// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The config-manager plugin: validates the decoded daemon configuration,
//! exposes it on the store and over RPC, and publishes `config:loaded`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use od_core::config::validate;
use od_core::{events, CoreError, ErrorCode};
use od_kernel::{Plugin, PluginContext, PluginManifest};

/// Store key under which the validated configuration lives.
pub const CONFIG_STORE_KEY: &str = "config";

/// The config-manager plugin.
#[derive(Default, Debug)]
pub struct ConfigManagerPlugin;

impl ConfigManagerPlugin {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Plugin for ConfigManagerPlugin {
    fn manifest(&self) -> PluginManifest {
        PluginManifest::new("config-manager", env!("CARGO_PKG_VERSION")).with_priority(50)
    }

    async fn install(&self, ctx: &PluginContext) -> Result<(), CoreError> {
        let validated = validate(ctx.daemon_config())?;
        let value = serde_json::to_value(&validated).map_err(|e| {
            CoreError::new(
                ErrorCode::ConfigInvalid,
                format!("validated configuration is unserializable: {e}"),
            )
        })?;
        ctx.store().set(CONFIG_STORE_KEY, value.clone());
        ctx.bus()
            .publish(events::CONFIG_LOADED, json!({"config": value}));
        ctx.logger().info(&format!(
            "configuration loaded: {} app(s)",
            validated.apps.len()
        ));

        let store = ctx.store().clone();
        ctx.register_method(
            "config.get",
            Arc::new(move |_params, _conn| {
                let store = store.clone();
                Box::pin(async move {
                    Ok(store.get(CONFIG_STORE_KEY).unwrap_or(Value::Null))
                })
            }),
        )?;

        // The daemon holds a decoded value, not a file handle, so reload
        // re-validates that value, refreshes the store, and re-publishes
        // `config:loaded`.
        let raw = ctx.daemon_config().clone();
        let store = ctx.store().clone();
        let bus = ctx.bus().clone();
        ctx.register_method(
            "config.reload",
            Arc::new(move |_params, _conn| {
                let raw = raw.clone();
                let store = store.clone();
                let bus = bus.clone();
                Box::pin(async move {
                    let validated = validate(&raw)?;
                    let value = serde_json::to_value(&validated).map_err(|e| {
                        CoreError::new(
                            ErrorCode::ConfigInvalid,
                            format!("validated configuration is unserializable: {e}"),
                        )
                    })?;
                    store.set(CONFIG_STORE_KEY, value.clone());
                    bus.publish(events::CONFIG_LOADED, json!({"config": value}));
                    Ok(value)
                })
            }),
        )?;

        Ok(())
    }
}

#[cfg(test)]
#[path = "config_manager_tests.rs"]
mod tests;
