//! Request/response handshake of one station endpoint
//!
//! ```text
//!  req resp
//!   1   0   rising   -> run the action once, write ok/ng (+mismatch, complete), then resp=1
//!   0   1   falling  -> clear ok/ng and extra flags, then resp=0
//!   0   0   idle     -> nothing written, latch released
//!   1   1   held     -> nothing written
//! ```
//!
//! The outcome of a request window is latched. If writing the ack fails, later
//! polls in the same window re-write the latched bits instead of running the
//! action (and the MES upload) again.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, Level};

use crate::config::{StationAction, StationConfig};
use crate::error::{LineSrvError, LinkError, MesError, Result};
use crate::link::{DeviceLink, LinkSession};
use crate::mes::{MesSync, ParameterResult, UploadResult};
use crate::sink::{LogSink, ResultRepository};
use crate::snapshot::{SnapshotPublisher, StationSnapshot};
use crate::station::status::{status_label, StatusFlags, NO_STATUS};
use crate::validator::{Limit, LimitValidator, ReportedResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakePhase {
    Idle,
    RequestSeen,
    Processing,
    Acknowledged,
}

/// Outcome bits written back to the PLC before `resp`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckBits {
    pub ok: bool,
    pub ng: bool,
    pub mismatch: bool,
    pub complete: bool,
}

impl AckBits {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ng: false,
            mismatch: false,
            complete: true,
        }
    }

    pub fn ng() -> Self {
        Self {
            ok: false,
            ng: true,
            mismatch: false,
            complete: false,
        }
    }

    pub fn mismatch() -> Self {
        Self {
            mismatch: true,
            ..Self::ng()
        }
    }
}

/// What one poll did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No edge, nothing written
    Steady,
    /// Rising edge acknowledged with these bits
    Acknowledged(AckBits),
    /// Falling edge, flags cleared
    Reset,
}

/// Collaborators of a station
#[derive(Clone)]
pub struct StationDeps {
    pub mes: Option<Arc<MesSync>>,
    pub log: Arc<dyn LogSink>,
    pub repository: Option<Arc<dyn ResultRepository>>,
}

/// PLC side of the register block as read at the start of a poll
#[derive(Debug, Clone)]
struct Observation {
    req: bool,
    resp: bool,
    ok: bool,
    ng: bool,
    sn: String,
    status: Option<u8>,
}

pub struct StationHandshake {
    config: StationConfig,
    action: StationAction,
    deps: StationDeps,
    phase: HandshakePhase,
    latched: Option<AckBits>,
    publisher: SnapshotPublisher,
}

impl StationHandshake {
    pub fn new(config: StationConfig, deps: StationDeps) -> Result<Self> {
        let action = config.effective_action();
        if action == StationAction::Inspect && deps.mes.is_none() {
            return Err(LineSrvError::config(format!(
                "station {} inspects but no MES client is configured",
                config.name
            )));
        }
        let publisher = SnapshotPublisher::new(StationSnapshot::initial(&config.name, config.role));
        Ok(Self {
            config,
            action,
            deps,
            phase: HandshakePhase::Idle,
            latched: None,
            publisher,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Outcome kept for the current request window, if any
    pub fn latched(&self) -> Option<AckBits> {
        self.latched
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<StationSnapshot> {
        self.publisher.subscribe()
    }

    pub fn snapshot(&self) -> StationSnapshot {
        self.publisher.current()
    }

    fn record(&self, level: Level, message: impl AsRef<str>) {
        self.deps
            .log
            .record(level, &format!("[{}] {}", self.config.name, message.as_ref()));
    }

    /// Run one handshake step against `link`.
    ///
    /// A failed read on a dropped link triggers one reconnect and one retried
    /// read when the link allows it. Any other link error aborts the poll.
    pub async fn poll(&mut self, link: &DeviceLink) -> std::result::Result<PollOutcome, LinkError> {
        let mut session = link.session().await;
        let observed = match self.observe(&mut session).await {
            Ok(observed) => observed,
            Err(err) => {
                drop(session);
                let params = link.params();
                if !params.auto_reconnect || link.is_connected() || link.is_reconnecting() {
                    return Err(err);
                }
                debug!("[{}] read failed ({}), reconnecting {}", self.config.name, err, link.name());
                if !link.try_reconnect().await {
                    return Err(err);
                }
                session = link.session().await;
                self.observe(&mut session).await?
            },
        };

        let outcome = match (observed.req, observed.resp) {
            (true, false) => PollOutcome::Acknowledged(self.on_request(&mut session, &observed).await?),
            (false, true) => {
                self.on_reset(&mut session).await?;
                PollOutcome::Reset
            },
            (false, false) => {
                if self.latched.take().is_some() {
                    debug!("[{}] request withdrawn before acknowledge", self.config.name);
                }
                self.phase = HandshakePhase::Idle;
                PollOutcome::Steady
            },
            (true, true) => PollOutcome::Steady,
        };
        drop(session);

        self.publish(&observed, outcome);
        Ok(outcome)
    }

    async fn observe(&self, session: &mut LinkSession<'_>) -> std::result::Result<Observation, LinkError> {
        let regs = &self.config.registers;
        let bits = session
            .read_bool_batch(&[
                regs.req.as_str(),
                regs.resp.as_str(),
                regs.ok.as_str(),
                regs.ng.as_str(),
            ])
            .await?;
        let sn = session.read_string(&regs.sn, regs.sn_len).await?;
        let status = match &regs.status {
            Some(address) => Some((session.read::<u16>(address).await? & 0x00FF) as u8),
            None => None,
        };
        Ok(Observation {
            req: bits[0],
            resp: bits[1],
            ok: bits[2],
            ng: bits[3],
            sn,
            status,
        })
    }

    async fn on_request(
        &mut self,
        session: &mut LinkSession<'_>,
        observed: &Observation,
    ) -> std::result::Result<AckBits, LinkError> {
        let ack = match self.latched {
            Some(ack) => {
                debug!("[{}] re-writing latched acknowledge", self.config.name);
                ack
            },
            None => {
                self.phase = HandshakePhase::RequestSeen;
                self.record(Level::INFO, format!("request received, sn={}", observed.sn));

                self.phase = HandshakePhase::Processing;
                let ack = match self.action {
                    StationAction::PassThrough => Ok(AckBits::ok()),
                    StationAction::Inspect => self.inspect(session, &observed.sn).await,
                };
                let ack = match ack {
                    Ok(ack) => ack,
                    Err(e) => {
                        self.phase = HandshakePhase::Idle;
                        return Err(e);
                    },
                };
                self.latched = Some(ack);
                ack
            },
        };

        self.write_ack(session, ack).await?;
        self.phase = HandshakePhase::Acknowledged;
        self.record(
            Level::INFO,
            format!(
                "acknowledged sn={} ok={} ng={} mismatch={}",
                observed.sn, ack.ok, ack.ng, ack.mismatch
            ),
        );
        Ok(ack)
    }

    async fn write_ack(
        &self,
        session: &mut LinkSession<'_>,
        ack: AckBits,
    ) -> std::result::Result<(), LinkError> {
        let regs = &self.config.registers;
        session.write(&regs.ok, ack.ok).await?;
        session.write(&regs.ng, ack.ng).await?;
        if let Some(address) = &regs.mismatch {
            session.write(address, ack.mismatch).await?;
        }
        if let Some(address) = &regs.complete {
            session.write(address, ack.complete).await?;
        }
        // resp goes last so the PLC never sees it before the outcome
        session.write(&regs.resp, true).await
    }

    async fn on_reset(&mut self, session: &mut LinkSession<'_>) -> std::result::Result<(), LinkError> {
        self.latched = None;
        let regs = &self.config.registers;
        session.write(&regs.ok, false).await?;
        session.write(&regs.ng, false).await?;
        for address in regs
            .complete
            .iter()
            .chain(regs.mismatch.iter())
            .chain(regs.reset_clears.iter())
        {
            session.write(address, false).await?;
        }
        session.write(&regs.resp, false).await?;
        self.phase = HandshakePhase::Idle;
        self.record(Level::DEBUG, "reset");
        Ok(())
    }

    /// Measured values and limits, in parameter order
    async fn read_parameters(
        &self,
        session: &mut LinkSession<'_>,
    ) -> std::result::Result<(Vec<f64>, Vec<Limit>), LinkError> {
        let parameters = &self.config.parameters;
        let mut measured = Vec::with_capacity(parameters.len());
        let mut limits = Vec::with_capacity(parameters.len());
        for param in parameters {
            measured.push(f64::from(session.read::<f32>(&param.address).await?));
            let lower = match (param.lower, &param.lower_address) {
                (Some(value), _) => value,
                (None, Some(address)) => f64::from(session.read::<f32>(address).await?),
                (None, None) => f64::NEG_INFINITY,
            };
            let upper = match (param.upper, &param.upper_address) {
                (Some(value), _) => value,
                (None, Some(address)) => f64::from(session.read::<f32>(address).await?),
                (None, None) => f64::INFINITY,
            };
            limits.push(Limit::new(lower, upper));
        }
        Ok((measured, limits))
    }

    /// Validate, reconcile with the PLC verdict, upload
    async fn inspect(
        &self,
        session: &mut LinkSession<'_>,
        sn: &str,
    ) -> std::result::Result<AckBits, LinkError> {
        let (measured, limits) = self.read_parameters(session).await?;
        let report = match LimitValidator::validate(&measured, &limits) {
            Ok(report) => report,
            Err(e) => {
                self.record(Level::ERROR, format!("sn={sn}: {e}"));
                return Ok(AckBits::ng());
            },
        };

        if let Some((ok_address, ng_address)) = self.config.registers.counters() {
            let ok_count: u16 = session.read(ok_address).await?;
            let ng_count: u16 = session.read(ng_address).await?;
            let reported = ReportedResult::from_counters(ok_count, ng_count);
            if let Err(mismatch) = LimitValidator::reconcile(report.aggregate, reported) {
                self.record(
                    Level::ERROR,
                    format!("sn={sn}: {mismatch} (OKCount={ok_count}, NGCount={ng_count}), upload skipped"),
                );
                return Ok(AckBits::mismatch());
            }
        }

        let Some(mes) = &self.deps.mes else {
            self.record(Level::ERROR, "no MES client, answering NG");
            return Ok(AckBits::ng());
        };
        let request = MesSync::build_request(
            &self.config.identity,
            sn,
            &self.config.parameters,
            &measured,
            &limits,
            &report,
        );

        let outcome = mes.upload(&request).await;
        let (ack, mes_code, mes_message) = match outcome {
            Ok(response) => {
                self.record(
                    Level::INFO,
                    format!("MES accepted sn={sn} result={}", report.aggregate),
                );
                (AckBits::ok(), Some(response.code), response.message)
            },
            // both answer NG; only the log tells an unreachable MES from a refusal
            Err(e) if e.is_transport() => {
                self.record(Level::ERROR, format!("MES upload failed for sn={sn}: {e}"));
                (AckBits::ng(), None, e.to_string())
            },
            Err(e) => {
                self.record(Level::WARN, format!("MES refused sn={sn}: {e}"));
                match e {
                    MesError::Rejected { code, message } => (AckBits::ng(), Some(code), message),
                    other => (AckBits::ng(), None, other.to_string()),
                }
            },
        };

        if let Some(repository) = &self.deps.repository {
            let result = UploadResult {
                sn: sn.to_string(),
                station: self.config.name.clone(),
                aggregate: report.aggregate,
                parameters: self
                    .config
                    .parameters
                    .iter()
                    .zip(&measured)
                    .zip(&limits)
                    .zip(&report.per_parameter)
                    .map(|(((spec, value), limit), result)| ParameterResult {
                        name: spec.name.clone(),
                        value: *value,
                        lower: limit.lower,
                        upper: limit.upper,
                        result: *result,
                    })
                    .collect(),
                mes_code,
                mes_message,
                finished_at: Utc::now(),
            };
            if let Err(e) = repository.save(result).await {
                self.record(Level::WARN, format!("result for sn={sn} not stored: {e}"));
            }
        }

        Ok(ack)
    }

    fn publish(&self, observed: &Observation, outcome: PollOutcome) {
        let (resp, ok, ng) = match outcome {
            PollOutcome::Acknowledged(ack) => (true, ack.ok, ack.ng),
            PollOutcome::Reset => (false, false, false),
            PollOutcome::Steady => (observed.resp, observed.ok, observed.ng),
        };
        self.publisher.publish(StationSnapshot {
            station: self.config.name.clone(),
            role: self.config.role,
            req: observed.req,
            resp,
            ok,
            ng,
            sn: observed.sn.clone(),
            status: observed.status.map(StatusFlags::decode).unwrap_or_default(),
            status_label: observed
                .status
                .map_or(NO_STATUS, status_label)
                .to_string(),
            phase: self.phase,
            updated_at: Utc::now(),
        });
    }
}
