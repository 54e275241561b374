use clap::Parser;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use stream_dispatcher::config::{DispatcherConfig, DueWindowConfig, PowerControlConfig};
use stream_dispatcher::directory::{Directory, MemoryDirectory};
use stream_dispatcher::node::Node;
use stream_dispatcher::scheduler::{Assignment, BatchReport};
use stream_dispatcher::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "stream-dispatcher")]
#[command(version)]
#[command(about = "Assigns scheduled lecture streams to capture workers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Serve workers and dispatch due streams periodically
    Serve(ServeArgs),

    /// Run a single dispatch cycle and print what was assigned
    DispatchOnce(DirectoryArgs),
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct DirectoryArgs {
    /// JSON file with the courses, lecture halls, streams and workers to load
    #[arg(long, env = "DISPATCHER_SEED")]
    seed: Option<PathBuf>,

    /// Port workers serve their ToWorker service on
    #[arg(long, env = "DISPATCHER_WORKER_PORT", default_value = "50051")]
    worker_port: u16,

    /// Seconds to wait for a worker connection before giving up
    #[arg(long, env = "DISPATCHER_DIAL_TIMEOUT", default_value = "5",
          value_parser = clap::value_parser!(u64).range(1..))]
    dial_timeout_secs: u64,

    /// Seconds before its start a lecture stream becomes due
    #[arg(long, env = "DISPATCHER_STREAM_LEAD", default_value = "600")]
    stream_lead_secs: u64,

    /// Seconds a lecture stream stays due once its lead time is reached
    #[arg(long, env = "DISPATCHER_STREAM_WINDOW", default_value = "120")]
    stream_window_secs: u64,

    /// Seconds before its start a premiere becomes due
    #[arg(long, env = "DISPATCHER_PREMIERE_LEAD", default_value = "60")]
    premiere_lead_secs: u64,

    /// Workers silent for longer than this many seconds are considered dead
    #[arg(long, env = "DISPATCHER_ALIVE_THRESHOLD", default_value = "300")]
    alive_threshold_secs: u64,

    /// Username for the lecture hall power strips
    #[arg(long, env = "DISPATCHER_PWRCTRL_USER")]
    pwrctrl_user: Option<String>,

    /// Password for the lecture hall power strips
    #[arg(long, env = "DISPATCHER_PWRCTRL_PASSWORD", hide_env_values = true)]
    pwrctrl_password: Option<String>,
}

#[derive(Parser, Debug)]
struct ServeArgs {
    #[command(flatten)]
    directory: DirectoryArgs,

    /// Port to listen on for worker gRPC calls
    #[arg(long, env = "DISPATCHER_PORT", default_value = "50052")]
    port: u16,

    /// Port for the status dashboard (optional)
    #[arg(long, env = "DISPATCHER_DASHBOARD_PORT")]
    dashboard_port: Option<u16>,

    /// Seconds between dispatch runs
    #[arg(long, env = "DISPATCHER_INTERVAL", default_value = "60",
          value_parser = clap::value_parser!(u64).range(1..))]
    interval_secs: u64,

    /// Seconds around a stream's schedule in which self-streaming is accepted
    #[arg(long, env = "DISPATCHER_SELF_STREAM_TOLERANCE", default_value = "1800")]
    self_stream_tolerance_secs: u64,

    /// Token workers must present to join the pool. Joining is disabled without it.
    #[arg(long, env = "DISPATCHER_JOIN_TOKEN", hide_env_values = true)]
    join_token: Option<String>,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct AssignmentOutput {
    job_id: String,
    stream_id: u32,
    source: Option<String>,
    worker_id: String,
}

impl From<&Assignment> for AssignmentOutput {
    fn from(a: &Assignment) -> Self {
        Self {
            job_id: a.job_id.to_string(),
            stream_id: a.stream_id,
            source: a.source.map(|s| s.to_string()),
            worker_id: a.worker_id.clone(),
        }
    }
}

#[derive(Serialize)]
struct BatchOutput {
    assigned: Vec<AssignmentOutput>,
    failed: Vec<AssignmentOutput>,
    skipped: usize,
}

impl From<&BatchReport> for BatchOutput {
    fn from(batch: &BatchReport) -> Self {
        Self {
            assigned: batch.assigned.iter().map(Into::into).collect(),
            failed: batch.failed.iter().map(Into::into).collect(),
            skipped: batch.skipped,
        }
    }
}

#[derive(Serialize)]
struct DispatchOutput {
    premieres: BatchOutput,
    streams: BatchOutput,
}

// =============================================================================
// Helpers
// =============================================================================

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn base_config(args: &DirectoryArgs) -> DispatcherConfig {
    DispatcherConfig {
        worker_port: args.worker_port,
        dial_timeout: Duration::from_secs(args.dial_timeout_secs),
        power_control: PowerControlConfig {
            username: args.pwrctrl_user.clone(),
            password: args.pwrctrl_password.clone(),
        },
        due: DueWindowConfig {
            stream_lead: Duration::from_secs(args.stream_lead_secs),
            stream_window: Duration::from_secs(args.stream_window_secs),
            premiere_lead: Duration::from_secs(args.premiere_lead_secs),
            alive_threshold: Duration::from_secs(args.alive_threshold_secs),
        },
        ..DispatcherConfig::default()
    }
}

async fn load_directory(
    seed: &Option<PathBuf>,
    due: DueWindowConfig,
) -> Result<Directory, BoxError> {
    let memory = match seed {
        Some(path) => MemoryDirectory::load(path, due).await?,
        None => {
            tracing::warn!("No seed given, starting with an empty directory");
            MemoryDirectory::new(due)
        }
    };
    Ok(Directory::from_memory(Arc::new(memory)))
}

// =============================================================================
// Commands
// =============================================================================

fn serve_config(args: &ServeArgs) -> Result<DispatcherConfig, BoxError> {
    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let dashboard_addr: Option<SocketAddr> = match args.dashboard_port {
        Some(p) => Some(format!("0.0.0.0:{}", p).parse()?),
        None => None,
    };

    let config = DispatcherConfig {
        listen_addr,
        dashboard_addr,
        dispatch_interval: Duration::from_secs(args.interval_secs),
        self_stream_tolerance: Duration::from_secs(args.self_stream_tolerance_secs),
        join_token: args.join_token.clone(),
        ..base_config(&args.directory)
    };
    config.validate()?;
    Ok(config)
}

async fn run_server(args: ServeArgs) -> Result<(), BoxError> {
    let config = serve_config(&args)?;

    if config.join_token.is_none() {
        tracing::warn!("No join token configured, workers cannot join the pool");
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        dashboard_addr = ?config.dashboard_addr,
        worker_port = config.worker_port,
        interval_secs = config.dispatch_interval.as_secs(),
        "Starting stream dispatcher"
    );

    let directory = load_directory(&args.directory.seed, config.due.clone()).await?;
    let shutdown = install_shutdown_handler()?;
    Node::new(config, directory).run(shutdown).await
}

async fn run_dispatch_once(args: DirectoryArgs) -> Result<(), BoxError> {
    let config = base_config(&args);
    config.validate()?;
    let directory = load_directory(&args.seed, config.due.clone()).await?;
    let node = Node::new(config, directory);

    let report = node.dispatch_once().await;
    let output = DispatchOutput {
        premieres: (&report.premieres).into(),
        streams: (&report.streams).into(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();
    init_logging();

    match args.command {
        Commands::Serve(args) => run_server(args).await,
        Commands::DispatchOnce(args) => run_dispatch_once(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serve_args(extra: &[&str]) -> Result<ServeArgs, clap::Error> {
        let mut argv = vec!["stream-dispatcher", "serve"];
        argv.extend_from_slice(extra);
        match Args::try_parse_from(argv)?.command {
            Commands::Serve(args) => Ok(args),
            other => panic!("expected serve, got {other:?}"),
        }
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(serve_args(&["--interval-secs", "0"]).is_err());
        assert!(serve_args(&["--dial-timeout-secs", "0"]).is_err());
    }

    #[test]
    fn defaults_match_config_defaults() {
        let config = serve_config(&serve_args(&[]).unwrap()).unwrap();
        let defaults = DispatcherConfig::default();
        assert_eq!(config.dispatch_interval, defaults.dispatch_interval);
        assert_eq!(config.self_stream_tolerance, defaults.self_stream_tolerance);
        assert_eq!(config.due.stream_lead, defaults.due.stream_lead);
        assert_eq!(config.due.stream_window, defaults.due.stream_window);
        assert_eq!(config.due.premiere_lead, defaults.due.premiere_lead);
        assert_eq!(config.due.alive_threshold, defaults.due.alive_threshold);
    }

    #[test]
    fn windows_come_from_flags() {
        let args = serve_args(&[
            "--stream-lead-secs",
            "900",
            "--stream-window-secs",
            "60",
            "--premiere-lead-secs",
            "30",
            "--alive-threshold-secs",
            "120",
            "--self-stream-tolerance-secs",
            "600",
        ])
        .unwrap();
        let config = serve_config(&args).unwrap();

        assert_eq!(config.due.stream_lead, Duration::from_secs(900));
        assert_eq!(config.due.stream_window, Duration::from_secs(60));
        assert_eq!(config.due.premiere_lead, Duration::from_secs(30));
        assert_eq!(config.due.alive_threshold, Duration::from_secs(120));
        assert_eq!(config.self_stream_tolerance, Duration::from_secs(600));
    }

    #[test]
    fn oversized_window_flag_fails_validation() {
        let args = serve_args(&["--self-stream-tolerance-secs", "999999999"]).unwrap();
        assert!(serve_config(&args).is_err());
    }
}
