//! Funnel - Ship piped log lines to rotated files or registered outputs

use anyhow::Result;
use clap::Parser;
use funnel_core::load_config;
use funnel_logs::{processor_for, Consumer};
use funnel_watch::ConfigWatcher;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Logs go to stderr; stdout may be the output itself
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "funnel={0},funnel_logs={0},funnel_output={0},funnel_watch={0}",
                    log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if atty::is(atty::Stream::Stdin) {
        eprintln!("No pipe found to consume data from.");
        std::process::exit(1);
    }

    let (config, config_path) = load_config(cli.config.as_deref())?;
    match &config_path {
        Some(path) => info!("Using config file {}", path.display()),
        None => info!("No config file found, using defaults"),
    }
    let processor = processor_for(&config.prepend_value)?;

    let (reload_tx, reload_rx) = mpsc::channel(1);
    let _watcher = match &config_path {
        Some(path) => match ConfigWatcher::spawn(path, reload_tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Config hot reload disabled: {}", e);
                None
            }
        },
        None => None,
    };

    let consumer = Consumer::new(config, processor, funnel_output::global()).with_reload(reload_rx);
    let shutdown = consumer.shutdown_handle();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        result = consumer.start(tokio::io::stdin()) => {
            if let Err(e) = result {
                error!("{}", e);
                std::process::exit(1);
            }
            return Ok(());
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
        }
    }

    // Waits for the writer task to flush and rotate out the active file
    shutdown.shutdown().await;
    info!("Shutdown complete");
    std::process::exit(1);
}
