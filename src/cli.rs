//! CLI for the `forward` subcommand.

use std::io;
use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::load_config;

/// CLI arguments for running reverse forwards.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "hopchain-forward",
    version,
    about = "Bind remote listeners through relay chains and forward them locally"
)]
pub struct ForwardArgs {
    /// Config file path (toml).
    #[arg(short, long, default_value = "hopchain.toml")]
    pub config: PathBuf,

    /// Log level override (e.g. "info", "debug", "trace").
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Run every configured forward until Ctrl+C or SIGTERM.
pub async fn run_forward(args: ForwardArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&args.config)
        .map_err(|e| format!("failed to load config file {:?}: {e}", args.config))?;

    init_tracing(args.log_level.as_deref().unwrap_or(&config.log.level));

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();

    tokio::spawn(async move {
        shutdown_signal_handler().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    info!(
        version = hopchain_core::VERSION,
        chains = config.chains.len(),
        forwards = config.forwards.len(),
        "starting {}",
        hopchain_core::PROJECT_NAME
    );

    crate::forward::run(config, crate::default_registry(), shutdown)
        .await
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}
