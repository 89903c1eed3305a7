//! Unified logging module for line services
//!
//! Console output plus an optional daily rolling file, both using the
//! `timestamp [LEVEL] message` line format.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Custom event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809Z [INFO] Service started`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Keeps the non-blocking file writer alive for the whole process
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name (e.g., "linesrv"), used as log file prefix
    pub service_name: String,
    /// Directory for the rolling log file; `None` disables file logging
    pub log_dir: Option<PathBuf>,
    /// Default level when `RUST_LOG` is not set
    pub level: Level,
    /// Console output
    pub console: bool,
    /// ANSI colors on console
    pub ansi: bool,
    /// JSON format for the file layer
    pub enable_json: bool,
    /// Maximum number of daily files kept
    pub max_log_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_dir: None,
            level: Level::INFO,
            console: true,
            ansi: true,
            enable_json: false,
            max_log_files: 30,
        }
    }
}

/// Build the filter directive string.
///
/// `RUST_LOG` wins when present; otherwise the configured level applies globally
/// and the service's own target is raised to at least that level.
fn filter_directive(config: &LogConfig, env: Option<String>) -> String {
    match env {
        Some(env_str) if !env_str.trim().is_empty() => env_str,
        _ => format!(
            "{},{}={}",
            config.level.as_str().to_lowercase(),
            config.service_name,
            config.level.as_str().to_lowercase()
        ),
    }
}

/// Parse a level name, falling back to INFO for unknown names
pub fn parse_level(level: &str) -> Level {
    level.parse().unwrap_or(Level::INFO)
}

/// Initialize logging system with configuration
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let directive = filter_directive(&config, std::env::var("RUST_LOG").ok());
    let env_filter = EnvFilter::try_new(&directive)?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console {
        layers.push(
            fmt::layer()
                .with_ansi(config.ansi)
                .event_format(BracketedLevelFormat)
                .boxed(),
        );
    }

    if let Some(log_dir) = &config.log_dir {
        std::fs::create_dir_all(log_dir)?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(config.service_name.as_str())
            .filename_suffix("log")
            .max_log_files(config.max_log_files)
            .build(log_dir)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
        match guards.lock() {
            Ok(mut guards) => guards.push(guard),
            Err(poisoned) => poisoned.into_inner().push(guard),
        }

        let file_layer = if config.enable_json {
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_target(true)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .event_format(BracketedLevelFormat)
                .boxed()
        };
        layers.push(file_layer);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()?;

    tracing::info!(
        "Logging: {} @ {}",
        config.service_name,
        config
            .log_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "console only".to_string())
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_level_brackets() {
        assert_eq!(format_level(&Level::INFO), "[INFO]");
        assert_eq!(format_level(&Level::ERROR), "[ERROR]");
    }

    #[test]
    fn test_filter_prefers_rust_log() {
        let config = LogConfig {
            service_name: "linesrv".to_string(),
            ..Default::default()
        };
        assert_eq!(
            filter_directive(&config, Some("warn,linesrv=trace".to_string())),
            "warn,linesrv=trace"
        );
    }

    #[test]
    fn test_filter_default_uses_configured_level() {
        let config = LogConfig {
            service_name: "linesrv".to_string(),
            level: Level::DEBUG,
            ..Default::default()
        };
        assert_eq!(filter_directive(&config, None), "debug,linesrv=debug");
        assert_eq!(
            filter_directive(&config, Some("  ".to_string())),
            "debug,linesrv=debug"
        );
    }

    #[test]
    fn test_parse_level_fallback() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("loud"), Level::INFO);
    }
}
