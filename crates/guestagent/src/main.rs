//! Guest agent entry point.

use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use guestagent::{AgentConfig, Cli, LogFormat, events};
use guestagent_tracker::{ApiTracker, PortForwarder, TcpForwarder};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = AgentConfig::resolve(&cli)?;

    init_tracing(config.log_format, cli.debug)?;

    let forwarder = config
        .forwarder_address
        .map(|addr| Arc::new(TcpForwarder::new(addr)) as Arc<dyn PortForwarder>);
    let tracker = ApiTracker::new(config.tracker_config(), forwarder)?;

    tracing::info!(
        endpoint = %config.api_endpoint,
        admin_install = config.admin_install,
        "guestagent started"
    );

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stats = events::run(&tracker, stdin, shutdown_signal()).await?;

    tracing::info!(
        applied = stats.applied,
        failed = stats.failed,
        malformed = stats.malformed,
        "guestagent stopped"
    );
    Ok(())
}

fn init_tracing(format: LogFormat, debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(format!("guestagent={level},guestagent_tracker={level}")),
    };

    // stdout is left alone; events arrive on stdin and logs go to stderr.
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()?,
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?,
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
