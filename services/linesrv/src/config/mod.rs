//! Configuration loading
//!
//! Sources are merged with figment in this order: struct defaults, the
//! configuration file (format picked by extension), then `LINESRV_`
//! environment variables with `__` as the nesting separator
//! (`LINESRV_SERVICE__LOGGING__LEVEL=debug`).

pub mod types;

use std::collections::HashSet;
use std::path::Path;

use figment::providers::{Env, Format, Json, Toml, Yaml};
use figment::Figment;
use tracing::debug;

use crate::error::{LineSrvError, Result};
pub use types::*;

pub const ENV_PREFIX: &str = "LINESRV_";

/// Loaded and validated configuration
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: AppConfig,
}

impl ConfigManager {
    /// Load from a file plus environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LineSrvError::config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| LineSrvError::config("Invalid file extension"))?;

        let figment = Figment::new();
        let figment = match extension {
            "json" => figment.merge(Json::file(path)),
            "toml" => figment.merge(Toml::file(path)),
            "yaml" | "yml" => figment.merge(Yaml::file(path)),
            _ => {
                return Err(LineSrvError::config(format!(
                    "Unsupported config format: {extension}"
                )))
            },
        };

        debug!("Loading configuration from {}", path.display());
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate from an already assembled figment
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment
            .extract()
            .map_err(|e| LineSrvError::config(format!("Failed to parse config: {e}")))?;
        let manager = Self { config };
        manager.validate()?;
        Ok(manager)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn service_config(&self) -> &ServiceConfig {
        &self.config.service
    }

    pub fn links(&self) -> &[LinkConfig] {
        &self.config.links
    }

    pub fn station_count(&self) -> usize {
        self.config.links.iter().map(|l| l.stations.len()).sum()
    }

    /// Reject configurations the engine cannot run safely
    pub fn validate(&self) -> Result<()> {
        validate_config(&self.config)
    }
}

fn require(value: &str, what: &str, owner: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LineSrvError::config(format!("{owner}: {what} must not be empty")));
    }
    Ok(())
}

fn validate_config(config: &AppConfig) -> Result<()> {
    if let Some(mes) = &config.mes {
        require(&mes.base_url, "mes.base_url", "mes")?;
        if mes.timeout_ms == 0 {
            return Err(LineSrvError::config("mes: timeout_ms must be greater than 0"));
        }
    }

    let mut link_names = HashSet::new();
    let mut station_names = HashSet::new();

    for link in &config.links {
        require(&link.name, "name", "link")?;
        if !link_names.insert(link.name.as_str()) {
            return Err(LineSrvError::config(format!(
                "Duplicate link name: {}",
                link.name
            )));
        }
        if link.max_reconnect_attempts == 0 {
            return Err(LineSrvError::config(format!(
                "link {}: max_reconnect_attempts must be at least 1",
                link.name
            )));
        }
        for (value, what) in [
            (link.poll_interval_ms, "poll_interval_ms"),
            (link.connect_timeout_ms, "connect_timeout_ms"),
            (link.receive_timeout_ms, "receive_timeout_ms"),
        ] {
            if value == 0 {
                return Err(LineSrvError::config(format!(
                    "link {}: {what} must be greater than 0",
                    link.name
                )));
            }
        }
        if link.transport == TransportKind::ModbusTcp {
            require(&link.host, "host", &link.name)?;
        }

        for station in &link.stations {
            validate_station(station, config.mes.is_some())?;
            if !station_names.insert(station.name.as_str()) {
                return Err(LineSrvError::config(format!(
                    "Duplicate station name: {}",
                    station.name
                )));
            }
        }
    }
    Ok(())
}

fn validate_station(station: &StationConfig, has_mes: bool) -> Result<()> {
    require(&station.name, "name", "station")?;
    let owner = station.name.as_str();
    let regs = &station.registers;

    for (value, what) in [
        (&regs.req, "registers.req"),
        (&regs.resp, "registers.resp"),
        (&regs.ok, "registers.ok"),
        (&regs.ng, "registers.ng"),
        (&regs.sn, "registers.sn"),
    ] {
        require(value, what, owner)?;
    }
    for optional in [&regs.status, &regs.complete, &regs.mismatch, &regs.ok_count, &regs.ng_count]
        .into_iter()
        .flatten()
    {
        require(optional, "optional register address", owner)?;
    }
    for extra in &regs.reset_clears {
        require(extra, "registers.reset_clears entry", owner)?;
    }
    if regs.sn_len == 0 {
        return Err(LineSrvError::config(format!(
            "{owner}: registers.sn_len must be greater than 0"
        )));
    }
    if regs.ok_count.is_some() != regs.ng_count.is_some() {
        return Err(LineSrvError::config(format!(
            "{owner}: ok_count and ng_count must be configured together"
        )));
    }
    // a disagreement must be distinguishable from a plain NG
    if regs.ok_count.is_some() && regs.mismatch.is_none() {
        return Err(LineSrvError::config(format!(
            "{owner}: ok_count/ng_count need registers.mismatch"
        )));
    }

    if station.effective_action() == StationAction::Inspect {
        if !has_mes {
            return Err(LineSrvError::config(format!(
                "{owner}: inspect stations need a mes section"
            )));
        }
        require(&station.identity.station_code, "identity.station_code", owner)?;
    }

    let mut parameter_names = HashSet::new();
    for param in &station.parameters {
        require(&param.name, "parameter name", owner)?;
        require(&param.address, "parameter address", owner)?;
        if !parameter_names.insert(param.name.as_str()) {
            return Err(LineSrvError::config(format!(
                "{owner}: duplicate parameter {}",
                param.name
            )));
        }
        check_bound(owner, &param.name, "lower", param.lower, &param.lower_address)?;
        check_bound(owner, &param.name, "upper", param.upper, &param.upper_address)?;
        if let (Some(lower), Some(upper)) = (param.lower, param.upper) {
            if lower > upper {
                return Err(LineSrvError::config(format!(
                    "{owner}: parameter {} has lower limit {lower} above upper limit {upper}",
                    param.name
                )));
            }
        }
    }
    Ok(())
}

/// A bound needs exactly one source
fn check_bound(
    owner: &str,
    param: &str,
    which: &str,
    fixed: Option<f64>,
    address: &Option<String>,
) -> Result<()> {
    match (fixed, address) {
        (Some(value), None) if value.is_finite() => Ok(()),
        (Some(_), None) => Err(LineSrvError::config(format!(
            "{owner}: parameter {param} {which} limit must be finite"
        ))),
        (None, Some(addr)) => require(addr, &format!("{which}_address"), owner),
        (Some(_), Some(_)) => Err(LineSrvError::config(format!(
            "{owner}: parameter {param} sets both {which} and {which}_address"
        ))),
        (None, None) => Err(LineSrvError::config(format!(
            "{owner}: parameter {param} has no {which} limit"
        ))),
    }
}
