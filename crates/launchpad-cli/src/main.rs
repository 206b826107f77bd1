//! Launchpad CLI entry point
//!
//! `run` supervises a single service in the foreground and streams its events
//! as JSON lines on stdout. Diagnostics go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use launchpad_core::{
    ChannelEventPublisher, EventPayload, RunnerContext, ServiceConfig, ServiceEnv,
    ServiceEvent, ServiceRegistry, ServiceStatus, SettingsLoader,
};
use launchpad_process::{ExecutableResolver, ProcessSearch, SystemProcessSearch};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "launchpad")]
#[command(about = "Supervise local development services")]
#[command(version)]
struct Cli {
    /// Log filter for supervisor diagnostics, overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one service in the foreground until it exits or Ctrl-C
    Run(RunArgs),
    /// List processes rooted in a directory or matching a command
    Ps {
        /// Working directory to match
        dir: Option<PathBuf>,

        /// Command line substring to match instead
        #[arg(long, conflicts_with = "dir")]
        command: Option<String>,
    },
    /// Print where an executable resolves to
    Which {
        /// Executable name, e.g. npm or dotnet
        name: String,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Working directory of the service
    #[arg(short, long)]
    path: PathBuf,

    /// Process family
    #[arg(short = 't', long = "type", default_value = "dotnet")]
    service_type: String,

    /// Display name (defaults to the directory name)
    #[arg(short, long)]
    name: Option<String>,

    /// Environment override; an empty value removes the variable
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env_var)]
    env: Vec<(String, String)>,

    /// Start through the fast path that skips the build step
    #[arg(long)]
    no_build: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match cli.command {
        Commands::Run(args) => run(args, cli.config).await,
        Commands::Ps { dir, command } => {
            ps(dir, command).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Which { name } => {
            let path = ExecutableResolver::new()
                .resolve(&name)
                .with_context(|| format!("cannot resolve {name}"))?;
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Parse `KEY=VALUE`; `KEY=` is kept as a deletion marker
fn parse_env_var(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, _)) if key.is_empty() => Err(format!("missing variable name in `{s}`")),
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(format!("expected KEY=VALUE, got `{s}`")),
    }
}

async fn run(args: RunArgs, config: Option<PathBuf>) -> Result<ExitCode> {
    let loader = match config {
        Some(path) => SettingsLoader::with_path(path),
        None => SettingsLoader::new(),
    };
    let settings = loader
        .load()
        .with_context(|| format!("failed to load settings from {}", loader.path().display()))?;

    let path = std::fs::canonicalize(&args.path)
        .with_context(|| format!("invalid service path {}", args.path.display()))?;
    let name = args.name.unwrap_or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    });
    let env: ServiceEnv = args.env.into_iter().collect();
    let service = ServiceConfig::new(name, path, args.service_type).with_env(env);

    let (publisher, mut events) = ChannelEventPublisher::new();
    let registry = ServiceRegistry::new(Arc::new(RunnerContext::new(settings)), Arc::new(publisher));
    let id = registry.add(service, ServiceEnv::new());

    let started = if args.no_build {
        registry.start_without_build(&id).await
    } else {
        registry.start(&id).await
    };
    if let Err(e) = started {
        drain(&mut events)?;
        registry.shutdown_all().await;
        bail!("failed to start service: {e}");
    }

    let code = supervise(&registry, &id, &mut events).await?;
    registry.shutdown_all().await;
    drain(&mut events)?;
    Ok(code)
}

/// Print events until the service ends or the user interrupts
async fn supervise(
    registry: &ServiceRegistry,
    id: &str,
    events: &mut UnboundedReceiver<ServiceEvent>,
) -> Result<ExitCode> {
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut reached_running = false;

    loop {
        tokio::select! {
            signal = &mut interrupt => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!(service_id = %id, "Interrupted, stopping service");
                registry.stop(id).await.context("failed to stop service")?;
                return Ok(ExitCode::SUCCESS);
            }
            event = events.recv() => {
                let Some(event) = event else {
                    return Ok(ExitCode::SUCCESS);
                };
                print_event(&event)?;
                if let EventPayload::StatusUpdate { status, .. } = event.payload {
                    match status {
                        ServiceStatus::Running => reached_running = true,
                        ServiceStatus::Stopped if reached_running => return Ok(ExitCode::SUCCESS),
                        ServiceStatus::Error => return Ok(ExitCode::FAILURE),
                        _ => {}
                    }
                }
            }
        }
    }
}

fn drain(events: &mut UnboundedReceiver<ServiceEvent>) -> Result<()> {
    while let Ok(event) = events.try_recv() {
        print_event(&event)?;
    }
    Ok(())
}

fn print_event(event: &ServiceEvent) -> Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

async fn ps(dir: Option<PathBuf>, command: Option<String>) -> Result<()> {
    let search = SystemProcessSearch::new();
    let found = match (dir, command) {
        (_, Some(needle)) => search.find_by_command(&needle).await?,
        (Some(dir), None) => {
            let dir = std::fs::canonicalize(&dir)
                .with_context(|| format!("invalid directory {}", dir.display()))?;
            search.find_by_working_directory(&dir).await?
        }
        (None, None) => bail!("give a directory or --command"),
    };

    for process in found {
        let cwd = process.cwd.unwrap_or_default();
        println!("{}\t{}\t{}", process.pid, process.command, cwd);
    }
    Ok(())
}
