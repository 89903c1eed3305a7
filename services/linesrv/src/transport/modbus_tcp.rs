//! Modbus-TCP transport over `tokio-modbus`
//!
//! Address syntax (zero-based register numbers):
//!
//! | Address      | Area                                   |
//! |--------------|----------------------------------------|
//! | `HR<n>`      | holding register                       |
//! | `HR<n>.<b>`  | bit `b` (0-15) inside holding register |
//! | `IR<n>`      | input register (read only)             |
//! | `CO<n>`      | coil                                   |
//! | `DI<n>`      | discrete input (read only)             |
//!
//! Writing a holding-register bit uses Mask Write Register (function 22), so
//! the device applies the change to that bit alone and PLC-owned bits sharing
//! the word are never written back with a stale value.
//!
//! Exception responses and malformed addresses are protocol errors and leave
//! the connection up; I/O failures are connection errors.

use std::net::SocketAddr;
use std::str::FromStr;

use async_trait::async_trait;
use tokio_modbus::client::{tcp, Context, Reader, Writer};
use tokio_modbus::Slave;
use tracing::debug;

use super::{LinkTarget, RegisterTransport, TransportError};

/// Parsed Modbus register address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModbusAddress {
    Coil(u16),
    DiscreteInput(u16),
    Holding(u16),
    HoldingBit(u16, u8),
    Input(u16),
}

impl FromStr for ModbusAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || TransportError::protocol(format!("invalid Modbus address '{s}'"));
        if s.len() < 3 || !s.is_char_boundary(2) {
            return Err(invalid());
        }
        let (area, rest) = s.split_at(2);
        let area = area.to_ascii_uppercase();

        let (register, bit) = match rest.split_once('.') {
            Some((reg, bit)) => (reg, Some(bit)),
            None => (rest, None),
        };
        let register: u16 = register.parse().map_err(|_| invalid())?;

        match (area.as_str(), bit) {
            ("HR", None) => Ok(ModbusAddress::Holding(register)),
            ("HR", Some(bit)) => {
                let bit: u8 = bit.parse().map_err(|_| invalid())?;
                if bit > 15 {
                    return Err(TransportError::protocol(format!(
                        "bit position must be 0-15 in '{s}'"
                    )));
                }
                Ok(ModbusAddress::HoldingBit(register, bit))
            },
            ("IR", None) => Ok(ModbusAddress::Input(register)),
            ("CO", None) => Ok(ModbusAddress::Coil(register)),
            ("DI", None) => Ok(ModbusAddress::DiscreteInput(register)),
            _ => Err(invalid()),
        }
    }
}

/// Flatten the two error layers of a `tokio-modbus` call
fn flatten<T>(
    result: tokio_modbus::Result<T>,
    op: &str,
    address: &str,
) -> Result<T, TransportError> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(exception)) => Err(TransportError::protocol(format!(
            "{op} {address}: Modbus exception {exception:?}"
        ))),
        Err(e) => Err(TransportError::connection(format!("{op} {address}: {e}"))),
    }
}

/// AND/OR masks for function 22 that change only `bit`.
///
/// The device computes `(current & and) | (or & !and)`.
fn bit_masks(bit: u8, value: bool) -> (u16, u16) {
    let mask = 1u16 << bit;
    (!mask, if value { mask } else { 0 })
}

/// Modbus-TCP client transport
#[derive(Default)]
pub struct ModbusTcpTransport {
    ctx: Option<Context>,
}

impl std::fmt::Debug for ModbusTcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusTcpTransport")
            .field("connected", &self.ctx.is_some())
            .finish()
    }
}

impl ModbusTcpTransport {
    pub fn new() -> Self {
        Self { ctx: None }
    }

    fn ctx(&mut self) -> Result<&mut Context, TransportError> {
        self.ctx
            .as_mut()
            .ok_or_else(|| TransportError::connection("not connected"))
    }

    async fn resolve(target: &LinkTarget) -> Result<SocketAddr, TransportError> {
        let mut addrs = tokio::net::lookup_host((target.host.as_str(), target.port)).await?;
        addrs
            .next()
            .ok_or_else(|| TransportError::connection(format!("{target}: no address resolved")))
    }
}

#[async_trait]
impl RegisterTransport for ModbusTcpTransport {
    fn kind(&self) -> &'static str {
        "modbus_tcp"
    }

    async fn connect(&mut self, target: &LinkTarget) -> Result<(), TransportError> {
        self.ctx = None;
        let socket_addr = Self::resolve(target).await?;
        let ctx = tcp::connect_slave(socket_addr, Slave(target.unit_id)).await?;
        debug!("Modbus TCP connected to {} (unit {})", socket_addr, target.unit_id);
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        // Dropping the context closes the socket
        self.ctx = None;
        Ok(())
    }

    async fn read_bit(&mut self, address: &str) -> Result<bool, TransportError> {
        let parsed: ModbusAddress = address.parse()?;
        let ctx = self.ctx()?;
        let value = match parsed {
            ModbusAddress::Coil(reg) => {
                flatten(ctx.read_coils(reg, 1).await, "read coil", address)?
                    .first()
                    .copied()
            },
            ModbusAddress::DiscreteInput(reg) => flatten(
                ctx.read_discrete_inputs(reg, 1).await,
                "read discrete input",
                address,
            )?
            .first()
            .copied(),
            ModbusAddress::HoldingBit(reg, bit) => {
                flatten(
                    ctx.read_holding_registers(reg, 1).await,
                    "read holding register",
                    address,
                )?
                .first()
                .map(|word| (word >> bit) & 1 == 1)
            },
            ModbusAddress::Holding(_) | ModbusAddress::Input(_) => {
                return Err(TransportError::protocol(format!(
                    "'{address}' is a word address, not a bit"
                )))
            },
        };
        value.ok_or_else(|| TransportError::protocol(format!("empty response reading {address}")))
    }

    async fn write_bit(&mut self, address: &str, value: bool) -> Result<(), TransportError> {
        let parsed: ModbusAddress = address.parse()?;
        let ctx = self.ctx()?;
        match parsed {
            ModbusAddress::Coil(reg) => {
                flatten(ctx.write_single_coil(reg, value).await, "write coil", address)
            },
            ModbusAddress::HoldingBit(reg, bit) => {
                let (and_mask, or_mask) = bit_masks(bit, value);
                flatten(
                    ctx.masked_write_register(reg, and_mask, or_mask).await,
                    "mask write holding register",
                    address,
                )
            },
            _ => Err(TransportError::protocol(format!(
                "'{address}' is not a writable bit address"
            ))),
        }
    }

    async fn read_words(&mut self, address: &str, count: u16) -> Result<Vec<u16>, TransportError> {
        let parsed: ModbusAddress = address.parse()?;
        let ctx = self.ctx()?;
        let words = match parsed {
            ModbusAddress::Holding(reg) => flatten(
                ctx.read_holding_registers(reg, count).await,
                "read holding registers",
                address,
            )?,
            ModbusAddress::Input(reg) => flatten(
                ctx.read_input_registers(reg, count).await,
                "read input registers",
                address,
            )?,
            _ => {
                return Err(TransportError::protocol(format!(
                    "'{address}' is not a word address"
                )))
            },
        };
        if words.len() < count as usize {
            return Err(TransportError::protocol(format!(
                "short response reading {address}: {} of {count} words",
                words.len()
            )));
        }
        Ok(words)
    }

    async fn write_words(&mut self, address: &str, words: &[u16]) -> Result<(), TransportError> {
        let parsed: ModbusAddress = address.parse()?;
        let ctx = self.ctx()?;
        match parsed {
            ModbusAddress::Holding(reg) if words.len() == 1 => flatten(
                ctx.write_single_register(reg, words[0]).await,
                "write holding register",
                address,
            ),
            ModbusAddress::Holding(reg) => flatten(
                ctx.write_multiple_registers(reg, words).await,
                "write holding registers",
                address,
            ),
            _ => Err(TransportError::protocol(format!(
                "'{address}' is not a writable word address"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportErrorKind;

    #[test]
    fn test_parse_addresses() {
        assert_eq!("HR100".parse::<ModbusAddress>().unwrap(), ModbusAddress::Holding(100));
        assert_eq!(
            "HR100.3".parse::<ModbusAddress>().unwrap(),
            ModbusAddress::HoldingBit(100, 3)
        );
        assert_eq!("ir7".parse::<ModbusAddress>().unwrap(), ModbusAddress::Input(7));
        assert_eq!("CO0".parse::<ModbusAddress>().unwrap(), ModbusAddress::Coil(0));
        assert_eq!(
            "DI12".parse::<ModbusAddress>().unwrap(),
            ModbusAddress::DiscreteInput(12)
        );
    }

    #[test]
    fn test_reject_bad_addresses() {
        for bad in ["", "HR", "XX10", "HR-1", "HR10.16", "CO1.2", "DB4010.6.0", "HR70000"] {
            assert!(bad.parse::<ModbusAddress>().is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn test_bit_masks_leave_other_bits_alone() {
        let apply = |current: u16, (and, or): (u16, u16)| (current & and) | (or & !and);

        // req (bit 0) owned by the PLC stays whatever the device holds at write time
        assert_eq!(apply(0b0000, bit_masks(1, true)), 0b0010);
        assert_eq!(apply(0b0001, bit_masks(1, true)), 0b0011);
        assert_eq!(apply(0b0011, bit_masks(1, false)), 0b0001);
        assert_eq!(apply(0xFFFF, bit_masks(15, false)), 0x7FFF);
        assert_eq!(apply(0x0000, bit_masks(15, true)), 0x8000);
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let mut transport = ModbusTcpTransport::new();
        let err = transport.read_bit("CO1").await.unwrap_err();
        assert_eq!(err.message, "not connected");
        assert_eq!(err.kind, TransportErrorKind::Connection);
        // address errors are reported before the connection check
        let err = transport.read_words("XX1", 1).await.unwrap_err();
        assert!(err.message.contains("invalid"));
        assert_eq!(err.kind, TransportErrorKind::Protocol);
    }
}
