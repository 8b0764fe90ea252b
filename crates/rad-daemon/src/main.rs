//! Entry point: CLI parsing, config loading, logging setup, signal
//! handling, and wiring the task supervisor.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{error, info};

use rad_common::clock::SystemClock;
use rad_core::config::RawConfig;
#[cfg(target_os = "linux")]
use rad_core::link::LinuxLink;
use rad_core::{InMemoryMetrics, Supervisor};

#[derive(Parser, Debug)]
#[command(name = "rad", about = "IPv6 Router Advertisement daemon")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "/etc/rad/rad.toml")]
    config: PathBuf,

    /// Enable debug-level logging regardless of RUST_LOG.
    #[arg(short, long)]
    verbose: bool,

    /// Parse and validate the configuration, then exit without sending
    /// anything on the wire.
    #[arg(long)]
    dry_run: bool,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug,rad=trace" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.parse().unwrap()),
        )
        .init();
}

fn load_config(path: &PathBuf) -> anyhow::Result<RawConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
    let raw: RawConfig = toml::from_str(&content).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
    Ok(raw)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    info!(config = %cli.config.display(), "rad starting");

    let raw = match load_config(&cli.config) {
        Ok(raw) => raw,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let interfaces = match raw.resolve() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(e.exit_code());
        }
    };

    if interfaces.is_empty() {
        error!("configuration declares no interfaces");
        std::process::exit(1);
    }

    if cli.dry_run {
        info!(interfaces = interfaces.len(), "configuration is valid (dry run)");
        return;
    }

    #[cfg(not(target_os = "linux"))]
    {
        error!("rad's link adapter is only implemented for Linux");
        std::process::exit(2);
    }

    #[cfg(target_os = "linux")]
    {
        let link = Arc::new(LinuxLink);
        let clock = Arc::new(SystemClock);
        let metrics = Arc::new(InMemoryMetrics::new());
        let supervisor = Supervisor::new(link, clock, metrics);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(wait_for_signal(shutdown_tx));

        match supervisor.run(interfaces, shutdown_rx).await {
            Ok(()) => {
                info!("rad exited cleanly");
                std::process::exit(0);
            }
            Err(e) => {
                error!(error = %e, "rad exited with error");
                std::process::exit(e.exit_code());
            }
        }
    }
}

async fn wait_for_signal(shutdown_tx: watch::Sender<bool>) {
    let Ok(mut signals) = Signals::new([SIGINT, SIGTERM]) else {
        error!("failed to install signal handler");
        return;
    };
    if signals.next().await.is_some() {
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    }
}
