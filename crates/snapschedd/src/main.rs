//! snapschedd - The snapshot scheduler service
//!
//! Loads the configuration, resumes the schedules of every configured
//! filesystem and serves the control protocol on a Unix socket until
//! SIGTERM, SIGINT or SIGHUP.

use anyhow::{Context, Result};
use clap::Parser;
use snapsched_config::load_config;
use snapsched_util::default_config_path;
use snapschedd::Service;
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// snapschedd - Scheduled filesystem snapshots with retention
#[derive(Parser, Debug)]
#[command(name = "snapschedd")]
#[command(about = "Scheduled filesystem snapshots with retention", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/snapsched/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set SNAPSCHED_SOCKET env var)
    #[arg(short, long, env = "SNAPSCHED_SOCKET")]
    socket: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "snapschedd starting");

    if snapsched_util::is_mock_time_active() {
        info!(now = %snapsched_util::now(), "Running with mock time");
    }

    let settings = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    info!(
        config_path = %args.config.display(),
        filesystems = settings.filesystems.len(),
        default_fs = ?settings.default_fs,
        "Configuration loaded"
    );

    // Signal handlers go in before the socket opens
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

    let service = Service::new(settings, args.socket).await?;
    service
        .run(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
                _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
                _ = sighup.recv() => info!("Received SIGHUP, shutting down gracefully"),
            }
        })
        .await
}
