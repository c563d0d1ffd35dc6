//! co2mon - CO2/temperature sampling daemon.
//!
//! Run with: `co2mon [DEVICE]`

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use co2mon_service::{Config, DaemonError, daemon};

/// Sample a USB CO2 monitor into a round-robin store and draw graphs.
#[derive(Parser, Debug)]
#[command(name = "co2mon")]
#[command(version, about, long_about = None)]
struct Args {
    /// hidraw device node of the monitor [default: /dev/hidraw0].
    device: Option<PathBuf>,
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the status line.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("co2mon_service=info,co2mon_store=info")),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    match runtime.block_on(start(args.device)) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(DaemonError::AlreadyRunning) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            error!("{}", e);
            Ok(ExitCode::from(e.exit_code() as u8))
        }
    }
}

async fn start(device: Option<PathBuf>) -> Result<(), DaemonError> {
    let mut config = Config::load_validated()?;
    if let Some(device) = device {
        config.sensor.device = device;
    }
    daemon::run(&config).await
}
