// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `od` - opendaemon control CLI.
//!
//! Every subcommand maps onto one RPC call; exit code 0 on success, 1 on
//! failure with the error on stderr (`--verbose` adds the cause chain).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map, Value};

use od_cli::client::{socket_path, DaemonClient};
use od_cli::output::{render_process_detail, render_process_table};

#[derive(Parser)]
#[command(name = "od", version, about = "Control the opendaemon supervisor")]
struct Cli {
    /// Path to the daemon control socket
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Print raw JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Print error cause chains
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct StartArgs {
    /// Path to the program to supervise
    script: Option<PathBuf>,

    /// Process name (defaults to the script file stem)
    #[arg(long)]
    name: Option<String>,

    /// JSON manifest: one process config, or `{"apps": [...]}`
    #[arg(long, conflicts_with = "script")]
    config: Option<PathBuf>,

    /// Working directory for the child
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Interpreter to run the script with
    #[arg(long)]
    interpreter: Option<PathBuf>,

    /// Execution mode: fork or cluster
    #[arg(long)]
    mode: Option<String>,

    /// Instance count (cluster mode), or "max"
    #[arg(long)]
    instances: Option<String>,

    /// KEY=VALUE environment entries
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Restart policy: always, on-failure, unless-stopped, never
    #[arg(long)]
    restart: Option<String>,

    /// Milliseconds between crash and re-spawn
    #[arg(long)]
    restart_delay: Option<u64>,

    /// Restart budget before the process is marked errored
    #[arg(long)]
    max_restarts: Option<u32>,

    /// Milliseconds to wait for the child's ready signal
    #[arg(long)]
    min_uptime: Option<u64>,

    /// Milliseconds before a stop escalates to SIGKILL
    #[arg(long)]
    kill_timeout: Option<u64>,

    /// Arguments passed to the program (after `--`)
    #[arg(last = true)]
    args: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Start a process (or every app in a manifest)
    Start(StartArgs),
    /// Stop a process
    Stop {
        name: String,
        /// Signal to send (default SIGTERM)
        #[arg(long)]
        signal: Option<String>,
        /// Milliseconds before escalating to SIGKILL
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Stop then start a process
    Restart { name: String },
    /// Stop a process and remove its record
    Delete { name: String },
    /// List supervised processes
    List,
    /// Show one process in detail
    Info { name: String },
    /// Show daemon status
    Status,
    /// Ask the daemon to shut down gracefully
    Shutdown,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if verbose {
                eprintln!("error: {e:?}");
            } else {
                eprintln!("error: {e}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let socket = socket_path(cli.socket.clone());
    let client = DaemonClient::connect(&socket)
        .await
        .context("cannot reach the daemon")?;

    match cli.command {
        Command::Start(args) => start(&client, args, cli.json).await,
        Command::Stop {
            name,
            signal,
            timeout,
        } => {
            client.stop(&name, signal.as_deref(), timeout).await?;
            println!("stopped {name}");
            Ok(())
        }
        Command::Restart { name } => {
            let info = client.restart(&name).await?;
            print_info(&info, cli.json)
        }
        Command::Delete { name } => {
            client.delete(&name).await?;
            println!("deleted {name}");
            Ok(())
        }
        Command::List => {
            let infos = client.list().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&infos)?);
            } else {
                print!("{}", render_process_table(&infos));
            }
            Ok(())
        }
        Command::Info { name } => match client.info(&name).await? {
            Some(info) => print_info(&info, cli.json),
            None => bail!("no process named \"{name}\""),
        },
        Command::Status => {
            let status = client.status().await?;
            if cli.json {
                println!(
                    "{}",
                    json!({
                        "status": status.status,
                        "pid": status.pid,
                        "uptime": status.uptime,
                        "version": status.version,
                    })
                );
            } else {
                println!("status:  {}", status.status);
                println!("pid:     {}", status.pid);
                println!("uptime:  {}", od_cli::output::format_uptime(status.uptime));
                if let Some(version) = &status.version {
                    println!("version: {version}");
                }
            }
            Ok(())
        }
        Command::Shutdown => {
            client.shutdown().await?;
            println!("daemon shutting down");
            Ok(())
        }
    }
}

fn print_info(info: &od_core::ProcessInfo, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(info)?);
    } else {
        print!("{}", render_process_detail(info));
    }
    Ok(())
}

/// Build the process-config value(s) for `od start` and submit them.
async fn start(client: &DaemonClient, args: StartArgs, as_json: bool) -> Result<()> {
    if let Some(manifest) = &args.config {
        let text = std::fs::read_to_string(manifest)
            .with_context(|| format!("cannot read {}", manifest.display()))?;
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("cannot parse {}", manifest.display()))?;
        let apps: Vec<Value> = match value {
            Value::Object(ref map) if map.contains_key("apps") => {
                serde_json::from_value(map["apps"].clone())
                    .context("\"apps\" must be a list of process configs")?
            }
            app @ Value::Object(_) => vec![app],
            _ => bail!("manifest must be an object"),
        };
        for app in apps {
            let info = client.start(app).await?;
            print_info(&info, as_json)?;
        }
        return Ok(());
    }

    let script = args
        .script
        .clone()
        .ok_or_else(|| anyhow!("a script path or --config is required"))?;
    let config = inline_config(&args, &script)?;
    let info = client.start(config).await?;
    print_info(&info, as_json)
}

/// Translate inline flags into a process-config value.
fn inline_config(args: &StartArgs, script: &std::path::Path) -> Result<Value> {
    let name = match &args.name {
        Some(name) => name.clone(),
        None => script
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("cannot derive a name from {}", script.display()))?,
    };

    let mut config = Map::new();
    config.insert("name".into(), json!(name));
    config.insert("script".into(), json!(script));
    if let Some(cwd) = &args.cwd {
        config.insert("cwd".into(), json!(cwd));
    }
    if let Some(interpreter) = &args.interpreter {
        config.insert("interpreter".into(), json!(interpreter));
    }
    if let Some(mode) = &args.mode {
        config.insert("mode".into(), json!(mode));
    }
    if let Some(instances) = &args.instances {
        match instances.parse::<u32>() {
            Ok(n) => config.insert("instances".into(), json!(n)),
            Err(_) if instances == "max" => config.insert("instances".into(), json!("max")),
            Err(_) => bail!("--instances must be a number or \"max\""),
        };
    }
    if !args.env.is_empty() {
        let mut env = Map::new();
        for entry in &args.env {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("--env entries must be KEY=VALUE, got \"{entry}\""))?;
            env.insert(key.to_string(), json!(value));
        }
        config.insert("env".into(), Value::Object(env));
    }
    if let Some(restart) = &args.restart {
        config.insert("autoRestart".into(), json!(restart));
    }
    if let Some(delay) = args.restart_delay {
        config.insert("restartDelay".into(), json!(delay));
    }
    if let Some(max) = args.max_restarts {
        config.insert("maxRestarts".into(), json!(max));
    }
    if let Some(min_uptime) = args.min_uptime {
        config.insert("minUptime".into(), json!(min_uptime));
    }
    if let Some(kill_timeout) = args.kill_timeout {
        config.insert("killTimeout".into(), json!(kill_timeout));
    }
    if !args.args.is_empty() {
        config.insert("args".into(), json!(args.args));
    }
    Ok(Value::Object(config))
}
