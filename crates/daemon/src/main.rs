// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! opendaemon daemon (odd)
//!
//! Background process that supervises child programs and serves the local
//! control socket. Typically started by the `od` CLI; reads an optional
//! pre-decoded JSON configuration file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{error, info};

use od_core::config::validate;
use od_core::{CoreError, ErrorCode};
use od_kernel::Kernel;
use od_rpc::{Endpoint, Methods, RpcServer, ServerConfig};

use od_daemon::lifecycle::{rotate_log_if_needed, PidFile};
use od_daemon::{ConfigManagerPlugin, LifecycleError, ProcessManagerPlugin};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_help() {
    println!("odd {VERSION}");
    println!("opendaemon daemon - supervises child programs on this host");
    println!();
    println!("USAGE:");
    println!("    odd [--config <path>]");
    println!();
    println!("The daemon is typically started by the `od` CLI and should not");
    println!("be invoked directly. It listens on a local socket for commands");
    println!("from `od`.");
    println!();
    println!("OPTIONS:");
    println!("    --config <path>  JSON configuration file");
    println!("    -h, --help       Print help information");
    println!("    -v, --version    Print version information");
}

/// Parsed command line: the optional config path.
fn parse_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("odd {VERSION}");
                std::process::exit(0);
            }
            "--help" | "-h" | "help" => {
                print_help();
                std::process::exit(0);
            }
            "--config" => match args.next() {
                Some(path) => config_path = Some(PathBuf::from(path)),
                None => {
                    eprintln!("error: --config requires a path");
                    std::process::exit(1);
                }
            },
            other => {
                eprintln!("error: unexpected argument '{other}'");
                eprintln!("Usage: odd [--config <path>]");
                std::process::exit(1);
            }
        }
    }
    config_path
}

/// Read and decode the configuration file, or an empty object when none
/// was given.
fn load_config(path: Option<&PathBuf>) -> Result<Value, CoreError> {
    let Some(path) = path else {
        return Ok(json!({}));
    };
    let text = std::fs::read_to_string(path).map_err(|e| {
        CoreError::new(
            ErrorCode::ConfigNotFound,
            format!("cannot read config {}: {e}", path.display()),
        )
        .with_path(path)
    })?;
    serde_json::from_str(&text).map_err(|e| {
        CoreError::new(
            ErrorCode::ConfigParse,
            format!("cannot parse config {}: {e}", path.display()),
        )
        .with_path(path)
    })
}

fn setup_logging(
    log_dir: &std::path::Path,
) -> Result<tracing_appender::non_blocking::WorkerGuard, std::io::Error> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::never(log_dir, "daemon.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}

/// Register the daemon's own RPC methods (not owned by any plugin).
fn register_daemon_methods(methods: &Methods, kernel: &Arc<Kernel>, shutdown: &Arc<Notify>) {
    let status_kernel = Arc::clone(kernel);
    let result = methods.register(
        "daemon.status",
        Arc::new(move |_params, _conn| {
            let kernel = Arc::clone(&status_kernel);
            Box::pin(async move {
                Ok(json!({
                    "status": kernel.state().as_str(),
                    "pid": std::process::id(),
                    "uptime": kernel.uptime().as_secs(),
                    "version": VERSION,
                }))
            })
        }),
    );
    if let Err(e) = result {
        error!(error = %e, "failed to register daemon.status");
    }

    let shutdown = Arc::clone(shutdown);
    let result = methods.register(
        "daemon.shutdown",
        Arc::new(move |_params, _conn| {
            let shutdown = Arc::clone(&shutdown);
            Box::pin(async move {
                // The response is queued before the main loop tears the
                // server down, so the client still hears back.
                shutdown.notify_one();
                Ok(Value::Null)
            })
        }),
    );
    if let Err(e) = result {
        error!(error = %e, "failed to register daemon.shutdown");
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let config_path = parse_args();

    let raw_config = match load_config(config_path.as_ref()) {
        Ok(value) => value,
        Err(e) => {
            eprintln!("error: {e} ({})", e.code);
            return std::process::ExitCode::FAILURE;
        }
    };

    // Validate early to get the daemon section (paths, timeouts).
    let validated = match validate(&raw_config) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("error: {e} ({})", e.code);
            return std::process::ExitCode::FAILURE;
        }
    };
    let daemon_section = validated.daemon.clone();

    rotate_log_if_needed(&daemon_section.log_dir.join("daemon.log"));
    let _log_guard = match setup_logging(&daemon_section.log_dir) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: cannot set up logging: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    info!(version = VERSION, "starting daemon");

    // PID-file mutual exclusion: refuse to start when another daemon is
    // alive; the existing file is left untouched.
    let pid_file = match PidFile::claim(&daemon_section.pid_file) {
        Ok(pid_file) => pid_file,
        Err(e @ LifecycleError::AlreadyRunning { .. }) => {
            error!("{} ({})", e, e.code());
            eprintln!("error: {e} ({})", e.code());
            return std::process::ExitCode::FAILURE;
        }
        Err(e) => {
            error!(error = %e, "cannot claim PID file");
            eprintln!("error: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    match run(raw_config, &daemon_section).await {
        Ok(()) => {
            pid_file.remove();
            info!("daemon stopped");
            std::process::ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "daemon failed");
            eprintln!("error: {e}");
            pid_file.remove();
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(
    raw_config: Value,
    daemon_section: &od_core::DaemonSection,
) -> Result<(), Box<dyn std::error::Error>> {
    // Kernel with the built-in plugins.
    let kernel = Kernel::new();
    kernel.register_plugin(Arc::new(ConfigManagerPlugin::new()))?;
    kernel.register_plugin(Arc::new(ProcessManagerPlugin::new()))?;

    kernel.start(raw_config).await?;

    // The control socket is bound only once the kernel is ready, so RPC is
    // never served outside the ready state.
    let shutdown = Arc::new(Notify::new());
    register_daemon_methods(kernel.methods(), &kernel, &shutdown);

    let endpoint = Endpoint::Unix(daemon_section.socket_path.clone());
    let server = RpcServer::bind(
        ServerConfig::new(endpoint.clone()),
        kernel.methods().clone(),
    )
    .await?;
    info!(endpoint = %endpoint, "control socket ready");

    // Signal ready for whoever started us (CLI polls for this line).
    println!("READY");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sighup.recv() => info!("received SIGHUP, shutting down"),
        _ = shutdown.notified() => info!("shutdown requested over RPC"),
    }

    // Give an in-flight daemon.shutdown response a beat to flush.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Graceful teardown: control socket first, then the kernel (which
    // stops every plugin, the process-manager last of its dependents).
    server.shutdown().await;
    kernel.stop().await?;
    Ok(())
}
