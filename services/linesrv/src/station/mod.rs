//! Station endpoints: handshake engine and status decoding

pub mod handshake;
pub mod status;

pub use handshake::{AckBits, HandshakePhase, PollOutcome, StationDeps, StationHandshake};
pub use status::{status_label, StatusFlag, StatusFlags, NO_STATUS};
