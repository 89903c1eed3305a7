//! Register transport boundary
//!
//! The wire protocol (Modbus-TCP, S7, ...) lives behind [`RegisterTransport`].
//! Addresses are opaque strings owned by each transport; the rest of the
//! service never parses them. Typed values are layered on top by
//! [`crate::link::codec`].

pub mod memory;
pub mod modbus_tcp;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::{MemoryTransport, RegisterImage};
pub use modbus_tcp::{ModbusAddress, ModbusTcpTransport};

/// What a transport failure says about the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Socket lost, refused or in an unknown state
    Connection,
    /// The device answered but refused the request (exception response, bad address)
    Protocol,
}

/// Raw transport failure message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Connection,
            message: msg.into(),
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Protocol,
            message: msg.into(),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::connection(err.to_string())
    }
}

/// Where a transport connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    pub host: String,
    pub port: u16,
    /// Modbus unit identifier; ignored by transports without one
    pub unit_id: u8,
}

impl std::fmt::Display for LinkTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Minimal register access offered by a field transport
///
/// Implementations are used behind the owning link's mutex and never see
/// concurrent calls.
#[async_trait]
pub trait RegisterTransport: Send {
    /// Short protocol name for logs
    fn kind(&self) -> &'static str;

    async fn connect(&mut self, target: &LinkTarget) -> Result<(), TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;

    async fn read_bit(&mut self, address: &str) -> Result<bool, TransportError>;

    async fn write_bit(&mut self, address: &str, value: bool) -> Result<(), TransportError>;

    /// Read `count` consecutive 16-bit words starting at `address`
    async fn read_words(&mut self, address: &str, count: u16) -> Result<Vec<u16>, TransportError>;

    async fn write_words(&mut self, address: &str, words: &[u16]) -> Result<(), TransportError>;
}

/// Creates fresh transport instances; used when a link reinitializes on reconnect
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Box<dyn RegisterTransport>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Box<dyn RegisterTransport> + Send + Sync,
{
    fn create(&self) -> Box<dyn RegisterTransport> {
        self()
    }
}

/// Factory for Modbus-TCP links
pub fn modbus_tcp_factory() -> Arc<dyn TransportFactory> {
    Arc::new(|| Box::new(ModbusTcpTransport::new()) as Box<dyn RegisterTransport>)
}
