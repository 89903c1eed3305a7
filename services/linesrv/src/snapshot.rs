//! Station snapshots
//!
//! Each station publishes an immutable [`StationSnapshot`] on its own `watch`
//! channel. Subscribers are only woken when something other than the
//! timestamp changes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::config::StationRole;
use crate::station::status::{StatusFlags, NO_STATUS};
use crate::station::HandshakePhase;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationSnapshot {
    pub station: String,
    pub role: StationRole,
    pub req: bool,
    pub resp: bool,
    pub ok: bool,
    pub ng: bool,
    pub sn: String,
    pub status: StatusFlags,
    pub status_label: String,
    pub phase: HandshakePhase,
    pub updated_at: DateTime<Utc>,
}

impl StationSnapshot {
    pub fn initial(station: &str, role: StationRole) -> Self {
        Self {
            station: station.to_string(),
            role,
            req: false,
            resp: false,
            ok: false,
            ng: false,
            sn: String::new(),
            status: StatusFlags::default(),
            status_label: NO_STATUS.to_string(),
            phase: HandshakePhase::Idle,
            updated_at: Utc::now(),
        }
    }

    /// Equal in everything but `updated_at`
    pub fn same_state(&self, other: &Self) -> bool {
        self.station == other.station
            && self.role == other.role
            && self.req == other.req
            && self.resp == other.resp
            && self.ok == other.ok
            && self.ng == other.ng
            && self.sn == other.sn
            && self.status == other.status
            && self.status_label == other.status_label
            && self.phase == other.phase
    }
}

/// Write side of one station's channel
#[derive(Debug)]
pub struct SnapshotPublisher {
    tx: watch::Sender<StationSnapshot>,
}

impl SnapshotPublisher {
    pub fn new(initial: StationSnapshot) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Returns whether subscribers were notified
    pub fn publish(&self, next: StationSnapshot) -> bool {
        self.tx.send_if_modified(|current| {
            if current.same_state(&next) {
                return false;
            }
            *current = next;
            true
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<StationSnapshot> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> StationSnapshot {
        self.tx.borrow().clone()
    }
}

/// All stations' receivers, keyed by station name
#[derive(Debug, Clone, Default)]
pub struct SnapshotHub {
    receivers: BTreeMap<String, watch::Receiver<StationSnapshot>>,
}

impl SnapshotHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, station: &str, rx: watch::Receiver<StationSnapshot>) {
        self.receivers.insert(station.to_string(), rx);
    }

    pub fn subscribe(&self, station: &str) -> Option<watch::Receiver<StationSnapshot>> {
        self.receivers.get(station).cloned()
    }

    pub fn current(&self, station: &str) -> Option<StationSnapshot> {
        self.receivers.get(station).map(|rx| rx.borrow().clone())
    }

    /// Current snapshot of every station, ordered by name
    pub fn all(&self) -> Vec<StationSnapshot> {
        self.receivers.values().map(|rx| rx.borrow().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }
}
