//! Service bootstrap: command line and logging

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use crate::config::{ConfigManager, LoggingConfig};
use crate::error::{LineSrvError, Result};

/// Command-line arguments for linesrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "linesrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Production line station handshake and MES synchronization service",
    long_about = None
)]
pub struct Args {
    /// Configuration file (yaml, toml or json)
    #[arg(short = 'c', long, env = "LINESRV_CONFIG", default_value = "config/linesrv.yaml")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,

    /// Run every link against an in-memory register image instead of a PLC
    #[arg(long)]
    pub simulate: bool,
}

/// Initialize logging from the config file, with the command line taking precedence
pub fn initialize_logging(args: &Args, service_name: &str, logging: &LoggingConfig) -> Result<()> {
    let level = args.log_level.as_deref().unwrap_or(&logging.level);
    let log_config = common::LogConfig {
        service_name: service_name.to_string(),
        log_dir: logging.dir.as_ref().map(|dir| PathBuf::from(dir).join(service_name)),
        level: common::logging::parse_level(level),
        console: logging.console,
        ansi: !args.no_color,
        enable_json: logging.json,
        max_log_files: logging.max_files,
    };

    common::init_with_config(log_config)
        .map_err(|e| LineSrvError::config(format!("Failed to init logging: {e}")))
}

/// Print a summary of a validated configuration
pub fn describe_configuration(manager: &ConfigManager) {
    let config = manager.config();
    info!("Service: {}", config.service.name);
    match &config.mes {
        Some(mes) => info!("MES endpoint: {}", mes.upload_url()),
        None => info!("MES endpoint: none"),
    }
    info!("Found {} link(s)", config.links.len());
    for link in &config.links {
        info!(
            "  Link {}: {}:{} ({:?}, poll every {}ms)",
            link.name, link.host, link.port, link.transport, link.poll_interval_ms
        );
        for station in &link.stations {
            info!(
                "    Station {} ({}, {:?}, {} parameters)",
                station.name,
                station.role,
                station.effective_action(),
                station.parameters.len()
            );
        }
    }
}
