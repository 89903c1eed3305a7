//! Line Service (linesrv)
//!
//! Station handshake and MES synchronization for a production line.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use linesrv::bootstrap::{self, Args};
use linesrv::runtime::{build_line, start_line, BuildOptions};
use linesrv::ConfigManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_manager = ConfigManager::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let service = config_manager.service_config().clone();

    bootstrap::initialize_logging(&args, &service.name, &service.logging)?;
    info!(
        "Starting {} v{} with {}",
        service.name,
        env!("CARGO_PKG_VERSION"),
        args.config.display()
    );

    // Validation mode: validate and exit
    if args.validate {
        bootstrap::describe_configuration(&config_manager);
        info!("Validation completed successfully");
        return Ok(());
    }

    if args.simulate {
        warn!("Simulation mode: all links use in-memory register images");
    }
    let options = BuildOptions {
        simulate: args.simulate,
        ..BuildOptions::default()
    };
    let build = build_line(config_manager.config(), options)?;
    if build.links.is_empty() {
        warn!("No links configured");
    }

    let runtime = start_line(build, Duration::from_secs(service.status_interval_secs));
    info!("{} stations running", runtime.hub.len());

    let signal = common::wait_for_shutdown().await;
    info!("Received {}, shutting down", signal);
    runtime.shutdown().await;

    info!("{} stopped", service.name);
    Ok(())
}
