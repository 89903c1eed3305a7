//! Shared fixtures for linesrv integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::Level;

use linesrv::config::{
    ParameterSpec, RegisterMap, StationAction, StationConfig, StationIdentity, StationRole,
};
use linesrv::error::MesError;
use linesrv::mes::{MesClient, MesSync, UploadRequest, UploadResponse};
use linesrv::sink::{LogSink, MemoryRepository};
use linesrv::station::{StationDeps, StationHandshake};
use linesrv::transport::RegisterImage;
use linesrv::{DeviceLink, LinkParams};

pub const REQ: &str = "HR100.0";
pub const RESP: &str = "HR100.1";
pub const OK: &str = "HR100.2";
pub const NG: &str = "HR100.3";
pub const COMPLETE: &str = "HR100.4";
pub const MISMATCH: &str = "HR100.5";
pub const EXTRA: &str = "HR100.6";
pub const STATUS: &str = "HR101";
pub const OK_COUNT: &str = "HR102";
pub const NG_COUNT: &str = "HR103";
pub const SN: &str = "HR110";
pub const SN_LEN: u16 = 16;
pub const RESISTANCE: &str = "HR120";

/// MES double that records every request
pub struct RecordingMes {
    reply: Result<UploadResponse, MesError>,
    requests: Mutex<Vec<UploadRequest>>,
}

impl RecordingMes {
    fn with_reply(reply: Result<UploadResponse, MesError>) -> Arc<Self> {
        Arc::new(Self {
            reply,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn accepting() -> Arc<Self> {
        Self::with_reply(Ok(UploadResponse {
            code: 0,
            message: "ok".to_string(),
        }))
    }

    pub fn rejecting(code: i32, message: &str) -> Arc<Self> {
        Self::with_reply(Ok(UploadResponse {
            code,
            message: message.to_string(),
        }))
    }

    pub fn unreachable() -> Arc<Self> {
        Self::with_reply(Err(MesError::Transport(
            "error sending request: connection refused".to_string(),
        )))
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<UploadRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl MesClient for RecordingMes {
    async fn upload(&self, request: &UploadRequest) -> Result<UploadResponse, MesError> {
        self.requests.lock().push(request.clone());
        self.reply.clone()
    }
}

/// Log sink keeping every entry
#[derive(Default)]
pub struct RecordingLog {
    entries: Mutex<Vec<(Level, String)>>,
}

impl RecordingLog {
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }
}

impl LogSink for RecordingLog {
    fn record(&self, level: Level, message: &str) {
        self.entries.lock().push((level, message.to_string()));
    }
}

pub fn registers() -> RegisterMap {
    RegisterMap {
        req: REQ.to_string(),
        resp: RESP.to_string(),
        ok: OK.to_string(),
        ng: NG.to_string(),
        sn: SN.to_string(),
        sn_len: SN_LEN,
        status: Some(STATUS.to_string()),
        complete: Some(COMPLETE.to_string()),
        mismatch: Some(MISMATCH.to_string()),
        reset_clears: vec![EXTRA.to_string()],
        ok_count: Some(OK_COUNT.to_string()),
        ng_count: Some(NG_COUNT.to_string()),
    }
}

pub fn master_station(name: &str) -> StationConfig {
    StationConfig {
        name: name.to_string(),
        role: StationRole::Master,
        action: None,
        identity: StationIdentity {
            resource_code: "R01".to_string(),
            station_code: "OP40".to_string(),
            work_order_code: "WO-001".to_string(),
        },
        registers: registers(),
        parameters: vec![ParameterSpec {
            name: "resistance".to_string(),
            unit: "ohm".to_string(),
            address: RESISTANCE.to_string(),
            lower: Some(5.0),
            upper: Some(15.0),
            lower_address: None,
            upper_address: None,
        }],
    }
}

pub fn enter_station(name: &str) -> StationConfig {
    let mut registers = registers();
    registers.ok_count = None;
    registers.ng_count = None;
    StationConfig {
        name: name.to_string(),
        role: StationRole::Enter,
        action: Some(StationAction::PassThrough),
        identity: StationIdentity::default(),
        registers,
        parameters: Vec::new(),
    }
}

pub fn link_params(name: &str) -> LinkParams {
    LinkParams {
        name: name.to_string(),
        host: "sim".to_string(),
        port: 502,
        unit_id: 1,
        connect_timeout: Duration::from_millis(500),
        receive_timeout: Duration::from_millis(500),
        max_reconnect_attempts: 3,
        reconnect_interval: Duration::from_millis(10),
        auto_reconnect: true,
    }
}

pub async fn connected_link(image: &RegisterImage) -> Arc<DeviceLink> {
    let link = Arc::new(DeviceLink::new(link_params("plc-test"), image.factory()));
    link.connect().await.unwrap();
    link
}

/// One station on one in-memory link, with recording collaborators
pub struct Harness {
    pub image: RegisterImage,
    pub link: Arc<DeviceLink>,
    pub station: StationHandshake,
    pub mes: Arc<RecordingMes>,
    pub log: Arc<RecordingLog>,
    pub repository: Arc<MemoryRepository>,
}

impl Harness {
    pub async fn new(config: StationConfig, mes: Arc<RecordingMes>) -> Self {
        let image = RegisterImage::new();
        let link = connected_link(&image).await;
        let log = Arc::new(RecordingLog::default());
        let repository = Arc::new(MemoryRepository::new());
        let deps = StationDeps {
            mes: Some(Arc::new(MesSync::new(mes.clone()))),
            log: log.clone(),
            repository: Some(repository.clone()),
        };
        let station = StationHandshake::new(config, deps).unwrap();
        Self {
            image,
            link,
            station,
            mes,
            log,
            repository,
        }
    }

    pub async fn master() -> Self {
        Self::new(master_station("op40-master"), RecordingMes::accepting()).await
    }

    /// PLC raises a request for `sn` with one measured value and its counters
    pub fn request(&self, sn: &str, resistance: f32, ok_count: u16, ng_count: u16) {
        self.image.set_string(SN, sn, SN_LEN);
        self.image.set(RESISTANCE, resistance);
        self.image.set(OK_COUNT, ok_count);
        self.image.set(NG_COUNT, ng_count);
        self.image.set_bit(REQ, true);
    }

    /// (resp, ok, ng) as currently held by the PLC
    pub fn ack_bits(&self) -> (bool, bool, bool) {
        (
            self.image.bit(RESP),
            self.image.bit(OK),
            self.image.bit(NG),
        )
    }
}
