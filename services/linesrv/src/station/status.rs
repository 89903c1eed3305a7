//! Station status byte
//!
//! Each bit is an independent flag. The label shown to operators comes from the
//! first set flag in [`STATUS_PRIORITY`] order.

use serde::Serialize;

pub const NO_STATUS: &str = "No status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFlag {
    Fault,
    Auto,
    Idle,
    Manual,
    Review,
}

/// (flag, bit mask, label), highest priority first
pub const STATUS_PRIORITY: [(StatusFlag, u8, &str); 5] = [
    (StatusFlag::Fault, 0x01, "Fault"),
    (StatusFlag::Auto, 0x02, "Auto"),
    (StatusFlag::Idle, 0x04, "Idle"),
    (StatusFlag::Manual, 0x08, "Manual"),
    (StatusFlag::Review, 0x10, "Review"),
];

/// Unpacked status byte
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusFlags {
    pub fault: bool,
    pub auto: bool,
    pub idle: bool,
    pub manual: bool,
    pub review: bool,
}

impl StatusFlags {
    pub fn decode(byte: u8) -> Self {
        Self {
            fault: byte & 0x01 != 0,
            auto: byte & 0x02 != 0,
            idle: byte & 0x04 != 0,
            manual: byte & 0x08 != 0,
            review: byte & 0x10 != 0,
        }
    }
}

pub fn status_label(byte: u8) -> &'static str {
    STATUS_PRIORITY
        .iter()
        .find(|(_, mask, _)| byte & mask != 0)
        .map_or(NO_STATUS, |(_, _, label)| *label)
}
