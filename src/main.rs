//! Headless orchestrator binary
//!
//! Bridges the editor protocol over JSON-lines stdio: commands arrive one
//! JSON object per line on stdin, events leave one JSON object per line on
//! stdout. `list-ports` prints the current enumeration and exits.

use anyhow::Context;
use clap::{Parser, Subcommand};
use pinflow::board::scanner;
use pinflow::config::AppConfig;
use pinflow::supervisor::{Orchestrator, OrchestratorCommand, OrchestratorEvent};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pinflow", version, about = "Node-graph orchestrator for Firmata boards")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator with a JSON-lines stdio bridge (default)
    Run,
    /// Enumerate serial ports and exit
    ListPorts,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pinflow=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(cli.config.as_deref());

    match cli.command.unwrap_or(Command::Run) {
        Command::ListPorts => list_ports(),
        Command::Run => run(config),
    }
}

fn list_ports() -> anyhow::Result<()> {
    for port in scanner::list_ports() {
        match (port.vendor_id, port.product_id) {
            (Some(vid), Some(pid)) => println!("{}\t{:04x}:{:04x}", port.path, vid, pid),
            _ => println!("{}", port.path),
        }
    }
    Ok(())
}

fn run(config: AppConfig) -> anyhow::Result<()> {
    let (orchestrator, editor) = Orchestrator::new(config);
    let supervisor = std::thread::Builder::new()
        .name("supervisor".to_string())
        .spawn(move || orchestrator.run())
        .context("spawn supervisor thread")?;

    // Stdin reader: one command per line. EOF shuts the orchestrator down.
    let commands = editor.commands.clone();
    let stdin_reader = std::thread::Builder::new()
        .name("stdin-bridge".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<OrchestratorCommand>(line) {
                    Ok(cmd) => {
                        if commands.send(cmd).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("Ignoring malformed command: {}", e),
                }
            }
            let _ = commands.send(OrchestratorCommand::Shutdown);
        })
        .context("spawn stdin bridge thread")?;

    // Event pump: forward everything to stdout until the supervisor says
    // it is done.
    let stdout = std::io::stdout();
    loop {
        match editor.events.recv_timeout(Duration::from_millis(250)) {
            Ok(event) => {
                let done = matches!(event, OrchestratorEvent::Shutdown);
                let mut out = stdout.lock();
                serde_json::to_writer(&mut out, &event)?;
                writeln!(out)?;
                out.flush()?;
                if done {
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    let _ = supervisor.join();
    // The stdin thread may be blocked on a read; do not join it.
    drop(stdin_reader);
    Ok(())
}
