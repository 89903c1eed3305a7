//! Line Service Library (linesrv)
//!
//! Drives the request/response handshake between production-line stations and
//! their PLC, validates measured parameters against limits and synchronizes
//! inspection results with the MES.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │   Config Mgr    │───►│ StationScheduler│───►│ StationHandshake│
//! │ (YAML/TOML/env) │    │   (per link)    │    │  (per station)  │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//!                                 │                    │       │
//!                                 ▼                    ▼       ▼
//!                        ┌─────────────────┐  ┌────────────┐ ┌─────────┐
//!                        │   DeviceLink    │  │LimitValidtr│ │ MesSync │
//!                        │ (Modbus-TCP/mem)│  └────────────┘ │ (HTTP)  │
//!                        └─────────────────┘                 └─────────┘
//! ```
//!
//! - **`link`**: one PLC connection, typed register I/O, reconnect policy
//! - **`station`**: the edge-triggered handshake and status decoding
//! - **`validator`**: limit checks and PLC verdict reconciliation
//! - **`mes`**: MES upload payloads and HTTP client
//! - **`runtime`**: schedulers, startup and shutdown
//! - **`snapshot`**: per-station state published over `watch` channels

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod link;
pub mod mes;
pub mod runtime;
pub mod sink;
pub mod snapshot;
pub mod station;
pub mod transport;
pub mod validator;

pub use config::ConfigManager;
pub use error::{LineSrvError, LinkError, MesError, Result, ValidationMismatchError};
pub use link::{ConnectionState, DeviceLink, LinkParams, LinkSession, LinkStats};
pub use mes::{HttpMesClient, MesClient, MesSync, UploadRequest, UploadResponse, UploadResult};
pub use snapshot::{SnapshotHub, StationSnapshot};
pub use station::{AckBits, HandshakePhase, PollOutcome, StationDeps, StationHandshake};
pub use validator::{Limit, LimitValidator, ReportedResult, TestResult, ValidationReport};
