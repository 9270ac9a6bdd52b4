// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;
use tempfile::tempdir;
use yare::parameterized;

use od_core::ErrorCode;

use super::*;

fn cfg(value: serde_json::Value) -> ProcessConfig {
    serde_json::from_value(value).unwrap()
}

#[parameterized(
    bare = { "ready", true },
    padded = { "  ready  ", true },
    json_form = { r#"{"type":"ready"}"#, true },
    json_with_extras = { r#"{"type":"ready","port":8080}"#, true },
    wrong_type = { r#"{"type":"started"}"#, false },
    not_ready = { "starting up", false },
    empty = { "", false },
    json_no_type = { r#"{"ok":true}"#, false },
)]
fn ready_line_detection(line: &str, expected: bool) {
    assert_eq!(is_ready_line(line), expected);
}

#[test]
fn resolve_rejects_missing_script() {
    let config = cfg(json!({"name": "w", "script": "/no/such/file.sh"}));
    let err = resolve_script(&config).unwrap_err();
    assert_eq!(err.code, ErrorCode::ProcessInvalidConfig);
    assert!(err.message.contains("script not found"));
    assert_eq!(err.context.process.as_deref(), Some("w"));
}

#[test]
fn resolve_returns_absolute_path() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("app.sh");
    std::fs::write(&script, "#!/bin/sh\n").unwrap();

    let config = cfg(json!({"name": "w", "script": script}));
    let resolved = resolve_script(&config).unwrap();
    assert!(resolved.is_absolute());
}

#[test]
fn relative_script_resolves_against_cwd() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("app.sh"), "#!/bin/sh\n").unwrap();

    let config = cfg(json!({"name": "w", "script": "app.sh", "cwd": dir.path()}));
    let resolved = resolve_script(&config).unwrap();
    assert!(resolved.ends_with("app.sh"));
    assert!(resolved.is_absolute());
}

#[test]
fn command_uses_interpreter_when_configured() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("app.py");
    std::fs::write(&script, "print('hi')\n").unwrap();

    let config = cfg(json!({
        "name": "w",
        "script": script,
        "interpreter": "/usr/bin/python3",
        "args": ["--port", "8080"],
    }));
    let cmd = build_command(&config, &script, 0, 1);
    let std_cmd = cmd.as_std();
    assert_eq!(std_cmd.get_program(), "/usr/bin/python3");
    let args: Vec<_> = std_cmd.get_args().collect();
    assert_eq!(args[0], script.as_os_str());
    assert_eq!(args[1], "--port");
    assert_eq!(args[2], "8080");
}

#[test]
fn command_defaults_cwd_to_script_directory() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("app.sh");
    std::fs::write(&script, "#!/bin/sh\n").unwrap();

    let config = cfg(json!({"name": "w", "script": script}));
    let cmd = build_command(&config, &script, 0, 1);
    assert_eq!(cmd.as_std().get_current_dir(), Some(dir.path()));
}

#[test]
fn cluster_workers_get_reserved_env_vars() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("app.sh");
    std::fs::write(&script, "#!/bin/sh\n").unwrap();

    let config = cfg(json!({"name": "w", "script": script, "mode": "cluster", "instances": 4}));
    let cmd = build_command(&config, &script, 2, 4);
    let envs: Vec<_> = cmd.as_std().get_envs().collect();
    assert!(envs
        .iter()
        .any(|(k, v)| *k == WORKER_INDEX_VAR && v.map(|v| v == "2").unwrap_or(false)));
    assert!(envs
        .iter()
        .any(|(k, v)| *k == WORKER_COUNT_VAR && v.map(|v| v == "4").unwrap_or(false)));
}

#[test]
fn fork_children_do_not_get_worker_vars() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("app.sh");
    std::fs::write(&script, "#!/bin/sh\n").unwrap();

    let config = cfg(json!({"name": "w", "script": script}));
    let cmd = build_command(&config, &script, 0, 1);
    let envs: Vec<_> = cmd.as_std().get_envs().collect();
    assert!(!envs.iter().any(|(k, _)| *k == WORKER_INDEX_VAR));
}
