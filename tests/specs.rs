// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios driving the real `odd` and `od` binaries over a
//! Unix socket in a scratch directory.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use serial_test::serial;
use tempfile::{tempdir, TempDir};

fn bin(name: &str) -> PathBuf {
    assert_cmd::cargo::cargo_bin(name)
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// A running daemon in a scratch directory, killed on drop.
struct Daemon {
    child: Child,
    dir: TempDir,
    socket: PathBuf,
    pid_file: PathBuf,
}

impl Daemon {
    fn start() -> Self {
        let dir = tempdir().unwrap();
        let socket = dir.path().join("opendaemon.sock");
        let pid_file = dir.path().join("opendaemon.pid");
        let config = serde_json::json!({
            "daemon": {
                "socketPath": socket,
                "pidFile": pid_file,
                "logDir": dir.path().join("logs"),
            }
        });
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, config.to_string()).unwrap();

        let child = Command::new(bin("odd"))
            .arg("--config")
            .arg(&config_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        let daemon = Self {
            child,
            dir,
            socket,
            pid_file,
        };
        daemon.wait_for_socket();
        daemon
    }

    fn wait_for_socket(&self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if self.socket.exists() {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        panic!("daemon socket never appeared at {}", self.socket.display());
    }

    /// Run an `od` subcommand against this daemon.
    fn od(&self, args: &[&str]) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::new(bin("od"));
        cmd.arg("--socket").arg(&self.socket).args(args);
        cmd
    }

    fn wait_for_exit(&mut self, timeout: Duration) -> Option<std::process::ExitStatus> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(Some(status)) = self.child.try_wait() {
                return Some(status);
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        None
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
#[serial]
fn start_then_list_shows_an_online_process() {
    let daemon = Daemon::start();
    let script = write_script(daemon.dir.path(), "worker.sh", "sleep 30");

    daemon
        .od(&["start", script.to_str().unwrap(), "--name", "w"])
        .assert()
        .success();

    let output = daemon.od(&["--json", "list"]).assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let infos: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let list = infos.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["name"], "w");
    assert_eq!(list[0]["status"], "online");
    assert_eq!(list[0]["mode"], "fork");
    assert_eq!(list[0]["runningInstances"], 1);
    assert!(list[0]["pid"].as_u64().unwrap() > 0);
    assert_eq!(list[0]["restartCount"], 0);
}

#[test]
#[serial]
fn stopping_an_unknown_process_fails_with_its_code() {
    let daemon = Daemon::start();
    daemon
        .od(&["stop", "ghost"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("ghost"))
        .stderr(predicates::str::contains("process-not-found"));
}

#[test]
#[serial]
fn second_daemon_refuses_to_start_and_leaves_the_pid_file() {
    let daemon = Daemon::start();
    let original_pid = std::fs::read_to_string(&daemon.pid_file).unwrap();

    // Same config: same pid file, same socket.
    let config_path = daemon.dir.path().join("config.json");
    let output = Command::new(bin("odd"))
        .arg("--config")
        .arg(&config_path)
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(
        stderr.contains("daemon-already-running"),
        "stderr: {stderr}"
    );

    // Untouched: still names the first daemon.
    let pid_after = std::fs::read_to_string(&daemon.pid_file).unwrap();
    assert_eq!(pid_after, original_pid);
}

#[test]
#[serial]
fn shutdown_removes_socket_and_pid_file() {
    let mut daemon = Daemon::start();
    daemon.od(&["shutdown"]).assert().success();

    let status = daemon
        .wait_for_exit(Duration::from_secs(10))
        .expect("daemon did not exit after shutdown");
    assert!(status.success());
    assert!(!daemon.socket.exists());
    assert!(!daemon.pid_file.exists());
}

#[test]
#[serial]
fn status_reports_ready() {
    let daemon = Daemon::start();
    daemon
        .od(&["status"])
        .assert()
        .success()
        .stdout(predicates::str::contains("ready"));
}

#[test]
#[serial]
fn stop_restart_delete_roundtrip() {
    let daemon = Daemon::start();
    let script = write_script(daemon.dir.path(), "worker.sh", "sleep 30");

    daemon
        .od(&["start", script.to_str().unwrap(), "--name", "w"])
        .assert()
        .success();

    daemon
        .od(&["restart", "w"])
        .assert()
        .success()
        .stdout(predicates::str::contains("online"));

    daemon.od(&["stop", "w"]).assert().success();
    daemon
        .od(&["info", "w"])
        .assert()
        .success()
        .stdout(predicates::str::contains("stopped"));

    daemon.od(&["delete", "w"]).assert().success();
    daemon.od(&["info", "w"]).assert().failure();
}

#[test]
#[serial]
fn declared_apps_start_from_a_config_file() {
    let dir = tempdir().unwrap();
    let script = write_script(dir.path(), "app.sh", "sleep 30");
    let socket = dir.path().join("opendaemon.sock");
    let config = serde_json::json!({
        "daemon": {
            "socketPath": socket,
            "pidFile": dir.path().join("opendaemon.pid"),
            "logDir": dir.path().join("logs"),
        },
        "apps": [{"name": "auto", "script": script}],
    });
    let config_path = dir.path().join("config.json");
    std::fs::write(&config_path, config.to_string()).unwrap();

    let mut child = Command::new(bin("odd"))
        .arg("--config")
        .arg(&config_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline && !socket.exists() {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(socket.exists(), "daemon socket never appeared");

    let mut cmd = assert_cmd::Command::new(bin("od"));
    cmd.arg("--socket")
        .arg(&socket)
        .args(["info", "auto"])
        .assert()
        .success()
        .stdout(predicates::str::contains("online"));

    let _ = child.kill();
    let _ = child.wait();
}
