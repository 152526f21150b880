//! rollwatchd: the rollwatch daemon.
//!
//! Tracks rolling deployments and reports their outcome:
//! - Deployment store (redb)
//! - Orchestrator and event bus clients
//! - Lifecycle engine + trigger router
//! - HTTP trigger endpoint and periodic sweep
//!
//! # Usage
//!
//! ```text
//! rollwatchd --config /etc/rollwatch/rollwatch.toml serve
//! rollwatchd sweep
//! rollwatchd check-config
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rollwatchd::config::Config;
use rollwatchd::{api, daemon};

const DEFAULT_LOG_FILTER: &str = "info,rollwatchd=debug,rollwatch=debug";

#[derive(Parser)]
#[command(name = "rollwatchd", about = "rollwatch deployment watchdog")]
struct Cli {
    /// Path to rollwatch.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the trigger endpoint and sweep periodically.
    Serve {
        /// Override `server.listen`.
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Run one sweep and exit.
    Sweep,
    /// Print the effective configuration.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { listen } => {
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            run_serve(config).await
        }
        Command::Sweep => run_sweep_once(config).await,
        Command::CheckConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run_serve(config: Config) -> anyhow::Result<()> {
    info!("rollwatch daemon starting");

    let state = daemon::assemble(&config)?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Periodic sweep ─────────────────────────────────────────

    let sweeper = if config.sweep.interval_secs > 0 {
        let engine = state.engine.clone();
        let interval = Duration::from_secs(config.sweep.interval_secs);
        info!(interval = config.sweep.interval_secs, "sweeper started");
        Some(tokio::spawn(daemon::run_sweeper(engine, interval, shutdown_rx)))
    } else {
        info!("periodic sweep disabled");
        None
    };

    // ── API server ─────────────────────────────────────────────

    let router = api::build_router(state);
    let addr = config.server.listen;
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    if let Some(handle) = sweeper {
        let _ = handle.await;
    }

    info!("rollwatch daemon stopped");
    Ok(())
}

async fn run_sweep_once(config: Config) -> anyhow::Result<()> {
    let state = daemon::assemble(&config)?;
    let report = state.engine.sweep().await?;
    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        hanging = report.hanging,
        "sweep finished"
    );
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
