//! Per-link station scheduler
//!
//! Stations sharing a link are polled one after another on a fixed cadence.
//! Cancellation is only observed between cycles, so a handshake in progress
//! always finishes its writes.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::link::DeviceLink;
use crate::station::{PollOutcome, StationHandshake};

/// Counters of one cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub polled: usize,
    pub acknowledged: usize,
    pub resets: usize,
    pub failed: usize,
}

pub struct StationScheduler {
    link: Arc<DeviceLink>,
    stations: Vec<StationHandshake>,
    interval: Duration,
    /// Last error per station, to avoid logging the same failure every tick
    last_errors: Vec<Option<String>>,
}

impl StationScheduler {
    pub fn new(link: Arc<DeviceLink>, stations: Vec<StationHandshake>, interval: Duration) -> Self {
        let last_errors = vec![None; stations.len()];
        Self {
            link,
            stations,
            interval,
            last_errors,
        }
    }

    pub fn link(&self) -> &Arc<DeviceLink> {
        &self.link
    }

    pub fn stations(&self) -> &[StationHandshake] {
        &self.stations
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll every station once, in configuration order
    pub async fn run_cycle(&mut self) -> CycleReport {
        let Self {
            link,
            stations,
            last_errors,
            ..
        } = self;
        let mut report = CycleReport::default();

        for (station, last_error) in stations.iter_mut().zip(last_errors.iter_mut()) {
            report.polled += 1;
            match station.poll(link).await {
                Ok(outcome) => {
                    if last_error.take().is_some() {
                        info!("[{}] station recovered", station.name());
                    }
                    match outcome {
                        PollOutcome::Acknowledged(_) => report.acknowledged += 1,
                        PollOutcome::Reset => report.resets += 1,
                        PollOutcome::Steady => {},
                    }
                },
                Err(e) => {
                    report.failed += 1;
                    let message = e.to_string();
                    if last_error.as_deref() == Some(message.as_str()) {
                        debug!("[{}] poll failed: {}", station.name(), message);
                    } else {
                        warn!("[{}] poll failed: {}", station.name(), message);
                        *last_error = Some(message);
                    }
                },
            }
        }
        report
    }

    /// Connect, then cycle until `token` is cancelled
    pub async fn run(mut self, token: CancellationToken) {
        info!(
            "Scheduler for link {} started: {} stations every {:?}",
            self.link.name(),
            self.stations.len(),
            self.interval
        );

        if let Err(e) = self.link.connect().await {
            warn!("Initial connect of link {} failed: {}", self.link.name(), e);
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = token.cancelled() => {
                    info!("Scheduler for link {} received cancellation signal", self.link.name());
                    break;
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        self.link.disconnect().await;
        info!("Scheduler for link {} terminated", self.link.name());
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }
}
