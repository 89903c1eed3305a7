//! Configuration types
//!
//! Every field that has a sensible default carries one, so a minimal file only
//! names links, stations and their register addresses.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::link::LinkParams;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    /// MES endpoint; required as soon as one station inspects
    #[serde(default)]
    pub mes: Option<MesConfig>,

    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Period of the link statistics report, 0 disables it
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rolling log files; console only when absent
    #[serde(default)]
    pub dir: Option<String>,

    #[serde(default = "default_true")]
    pub console: bool,

    #[serde(default)]
    pub json: bool,

    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

/// MES HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MesConfig {
    pub base_url: String,

    #[serde(default = "default_upload_path")]
    pub upload_path: String,

    #[serde(default = "default_mes_timeout")]
    pub timeout_ms: u64,
}

impl MesConfig {
    pub fn upload_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.upload_path.trim_start_matches('/')
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Transport used by a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    ModbusTcp,
    /// In-memory register image, for commissioning without a PLC
    Memory,
}

/// One PLC connection and the stations wired to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub name: String,

    #[serde(default)]
    pub transport: TransportKind,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub stations: Vec<StationConfig>,
}

impl LinkConfig {
    pub fn link_params(&self) -> LinkParams {
        LinkParams {
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            unit_id: self.unit_id,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            receive_timeout: Duration::from_millis(self.receive_timeout_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            auto_reconnect: self.auto_reconnect,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Which sub-block of a station this endpoint serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationRole {
    Enter,
    Exit,
    Master,
}

impl StationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StationRole::Enter => "enter",
            StationRole::Exit => "exit",
            StationRole::Master => "master",
        }
    }
}

impl std::fmt::Display for StationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a station does on a rising request edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationAction {
    /// Acknowledge with `ok`
    PassThrough,
    /// Validate parameters, reconcile with the PLC verdict, upload to the MES
    Inspect,
}

/// Static identity sent with every MES upload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationIdentity {
    #[serde(default)]
    pub resource_code: String,
    #[serde(default)]
    pub station_code: String,
    #[serde(default)]
    pub work_order_code: String,
}

/// Symbolic register addresses of one station endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMap {
    pub req: String,
    pub resp: String,
    pub ok: String,
    pub ng: String,
    pub sn: String,

    /// Serial number length in bytes
    #[serde(default = "default_sn_len")]
    pub sn_len: u16,

    /// Status byte (low byte of the register)
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub complete: Option<String>,

    #[serde(default)]
    pub mismatch: Option<String>,

    /// Extra bits cleared on reset
    #[serde(default)]
    pub reset_clears: Vec<String>,

    #[serde(default)]
    pub ok_count: Option<String>,

    #[serde(default)]
    pub ng_count: Option<String>,
}

impl RegisterMap {
    /// Both PLC counters configured
    pub fn counters(&self) -> Option<(&str, &str)> {
        match (&self.ok_count, &self.ng_count) {
            (Some(ok), Some(ng)) => Some((ok.as_str(), ng.as_str())),
            _ => None,
        }
    }
}

/// One measured parameter and where its limits come from
///
/// A bound is either fixed (`lower`/`upper`) or read from the PLC
/// (`lower_address`/`upper_address`) in the same cycle as the value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,

    #[serde(default)]
    pub unit: String,

    /// Register holding the measured value (float32)
    pub address: String,

    #[serde(default)]
    pub lower: Option<f64>,

    #[serde(default)]
    pub upper: Option<f64>,

    #[serde(default)]
    pub lower_address: Option<String>,

    #[serde(default)]
    pub upper_address: Option<String>,
}

/// One station endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub name: String,

    pub role: StationRole,

    /// Defaults to `inspect` for master endpoints, `pass_through` otherwise
    #[serde(default)]
    pub action: Option<StationAction>,

    #[serde(default)]
    pub identity: StationIdentity,

    pub registers: RegisterMap,

    /// Order matters: it is the order of the uploaded test data
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl StationConfig {
    pub fn effective_action(&self) -> StationAction {
        self.action.unwrap_or(match self.role {
            StationRole::Master => StationAction::Inspect,
            StationRole::Enter | StationRole::Exit => StationAction::PassThrough,
        })
    }
}

fn default_service_name() -> String {
    "linesrv".to_string()
}

fn default_status_interval() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_files() -> usize {
    7
}

fn default_upload_path() -> String {
    "/api/test-result/upload".to_string()
}

fn default_mes_timeout() -> u64 {
    5000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_connect_timeout() -> u64 {
    3000
}

fn default_receive_timeout() -> u64 {
    1000
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_interval() -> u64 {
    2000
}

fn default_poll_interval() -> u64 {
    200
}

fn default_sn_len() -> u16 {
    40
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            status_interval_secs: default_status_interval(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
            console: true,
            json: false,
            max_files: default_max_files(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registers() -> RegisterMap {
        RegisterMap {
            req: "HR100.0".to_string(),
            resp: "HR100.1".to_string(),
            ok: "HR100.2".to_string(),
            ng: "HR100.3".to_string(),
            sn: "HR110".to_string(),
            sn_len: 40,
            status: None,
            complete: None,
            mismatch: None,
            reset_clears: Vec::new(),
            ok_count: Some("HR102".to_string()),
            ng_count: None,
        }
    }

    #[test]
    fn test_action_defaults_by_role() {
        let mut station = StationConfig {
            name: "op40".to_string(),
            role: StationRole::Master,
            action: None,
            identity: StationIdentity::default(),
            registers: registers(),
            parameters: Vec::new(),
        };
        assert_eq!(station.effective_action(), StationAction::Inspect);

        station.role = StationRole::Enter;
        assert_eq!(station.effective_action(), StationAction::PassThrough);

        station.action = Some(StationAction::Inspect);
        assert_eq!(station.effective_action(), StationAction::Inspect);
    }

    #[test]
    fn test_counters_need_both_registers() {
        let mut map = registers();
        assert!(map.counters().is_none());
        map.ng_count = Some("HR103".to_string());
        assert_eq!(map.counters(), Some(("HR102", "HR103")));
    }

    #[test]
    fn test_upload_url_joins_slashes() {
        let mes = MesConfig {
            base_url: "http://mes.local:8080/".to_string(),
            upload_path: "/api/upload".to_string(),
            timeout_ms: 100,
        };
        assert_eq!(mes.upload_url(), "http://mes.local:8080/api/upload");
    }
}
