//! Aircast Server - headless audio streaming supervisor daemon.
//!
//! Captures PCM from the configured input, streams it to the configured SRT
//! outputs and recordings, and keeps the silence watchdog running until the
//! process receives Ctrl+C or SIGTERM.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use aircast_core::{AudioEngine, ConfigStore};

use crate::config::ServerConfig;

/// Aircast Server - headless audio capture, streaming and recording daemon.
#[derive(Parser, Debug)]
#[command(name = "aircast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "AIRCAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Capture device (overrides config file).
    #[arg(short, long, env = "AIRCAST_CAPTURE_DEVICE")]
    device: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Aircast Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(device) = args.device {
        config.capture.device = device;
    }

    log::info!(
        "Configuration: device={}, outputs={}, recordings={}",
        config.capture.device,
        config.outputs.len(),
        config.recordings.len()
    );

    let store = ConfigStore::new(config.to_core_config());
    let engine = AudioEngine::new(store);

    engine.start().await.context("Failed to start the engine")?;
    log::info!("Engine started");

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown: sinks first, then the capture child.
    if let Err(e) = engine.stop().await {
        log::warn!("Shutdown finished with errors: {e}");
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
