// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use od_core::{ErrorCode, ValidatedConfig};
use od_kernel::Kernel;

use super::*;

#[tokio::test]
async fn install_validates_and_stores_the_config() {
    let kernel = Kernel::new();
    kernel
        .register_plugin(Arc::new(ConfigManagerPlugin::new()))
        .unwrap();

    let config = json!({
        "defaults": {"maxRestarts": 2},
        "apps": [{"name": "a", "script": "/bin/true"}],
    });
    kernel.start(config).await.unwrap();

    let stored = kernel.store().get(CONFIG_STORE_KEY).unwrap();
    let validated: ValidatedConfig = serde_json::from_value(stored).unwrap();
    assert_eq!(validated.apps.len(), 1);
    assert_eq!(validated.apps[0]["maxRestarts"], 2);

    kernel.stop().await.unwrap();
}

#[tokio::test]
async fn invalid_config_fails_daemon_startup() {
    let kernel = Kernel::new();
    kernel
        .register_plugin(Arc::new(ConfigManagerPlugin::new()))
        .unwrap();

    let err = kernel
        .start(json!({"apps": [{"script": "/bin/true"}]}))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::PluginInitializationFailed);
    assert_eq!(err.context.plugin.as_deref(), Some("config-manager"));
}

#[tokio::test]
async fn config_loaded_event_is_published() {
    let kernel = Kernel::new();
    kernel
        .register_plugin(Arc::new(ConfigManagerPlugin::new()))
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    kernel.bus().subscribe(
        "config:loaded",
        Arc::new(move |ev| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().push(ev.data);
                Ok(())
            })
        }),
    );

    kernel.start(json!({})).await.unwrap();
    // publish() is fire-and-forget; yield until the handler lands.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert!(seen[0]["config"].is_object());

    drop(seen);
    kernel.stop().await.unwrap();
}

#[tokio::test]
async fn config_get_and_reload_methods() {
    let kernel = Kernel::new();
    kernel
        .register_plugin(Arc::new(ConfigManagerPlugin::new()))
        .unwrap();
    kernel
        .start(json!({"apps": [{"name": "a", "script": "/bin/true"}]}))
        .await
        .unwrap();

    let get = kernel.methods().lookup("config.get").unwrap();
    let value = get(json!(null), 0).await.unwrap();
    let validated: ValidatedConfig = serde_json::from_value(value).unwrap();
    assert_eq!(validated.apps.len(), 1);

    let reload = kernel.methods().lookup("config.reload").unwrap();
    let value = reload(json!(null), 0).await.unwrap();
    let validated: ValidatedConfig = serde_json::from_value(value).unwrap();
    assert_eq!(validated.apps.len(), 1);

    kernel.stop().await.unwrap();
}
