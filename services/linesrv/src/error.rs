//! Error handling for the line service
//!
//! Three failure families come out of a station cycle:
//! - [`LinkError`]: register I/O against the PLC
//! - [`ValidationMismatchError`]: local limit verdict and PLC verdict disagree
//! - [`MesError`]: the MES refused the upload or could not be reached
//!
//! None of them is fatal; they degrade to "this station's cycle did not complete".

use thiserror::Error;

use crate::validator::{ReportedResult, TestResult};

/// Register I/O failure against one device link
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Operation attempted while the link is not connected
    #[error("Link {link} is not connected")]
    NotConnected { link: String },

    /// Transport refused the connection
    #[error("Connect to {target} failed: {message}")]
    Connect { target: String, message: String },

    /// Register read failed, carries the raw transport message
    #[error("Read {address} failed: {message}")]
    Read { address: String, message: String },

    /// Register write failed, carries the raw transport message
    #[error("Write {address} failed: {message}")]
    Write { address: String, message: String },

    /// Device answered with a refusal (exception response, unknown address)
    #[error("{address} rejected: {message}")]
    Rejected { address: String, message: String },

    /// Transport did not answer in time
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Raw registers could not be turned into the requested type
    #[error("Decode {address} failed: {message}")]
    Decode { address: String, message: String },
}

impl LinkError {
    /// Whether the failure leaves the socket in an unknown state
    pub fn breaks_connection(&self) -> bool {
        !matches!(self, LinkError::Decode { .. } | LinkError::Rejected { .. })
    }
}

/// Local aggregate and PLC-reported result disagree
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Validation mismatch: local result {local}, PLC reported {reported}")]
pub struct ValidationMismatchError {
    pub local: TestResult,
    pub reported: ReportedResult,
}

/// MES upload failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MesError {
    /// MES answered with a non-zero code
    #[error("MES rejected upload (code {code}): {message}")]
    Rejected { code: i32, message: String },

    /// HTTP layer failure (connect, timeout, non-2xx status)
    #[error("MES transport error: {0}")]
    Transport(String),

    /// Response body was not the expected `{code, message}` document
    #[error("MES response decode error: {0}")]
    Decode(String),
}

impl MesError {
    /// The MES was not reached or answered garbage, as opposed to refusing the upload
    pub fn is_transport(&self) -> bool {
        matches!(self, MesError::Transport(_) | MesError::Decode(_))
    }
}

/// Line service error type
#[derive(Error, Debug, Clone)]
pub enum LineSrvError {
    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Device link errors
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Local/PLC result disagreement
    #[error(transparent)]
    Mismatch(#[from] ValidationMismatchError),

    /// MES upload errors
    #[error(transparent)]
    Mes(#[from] MesError),

    /// Input validation errors (parameter/limit shape, invalid values)
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for the line service
pub type Result<T> = std::result::Result<T, LineSrvError>;

impl LineSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        LineSrvError::ConfigError(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        LineSrvError::ValidationError(msg.into())
    }
}

impl From<figment::Error> for LineSrvError {
    fn from(err: figment::Error) -> Self {
        LineSrvError::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for LineSrvError {
    fn from(err: reqwest::Error) -> Self {
        LineSrvError::Mes(MesError::Transport(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_keeps_connection() {
        let decode = LinkError::Decode {
            address: "HR10".to_string(),
            message: "non-finite float".to_string(),
        };
        assert!(!decode.breaks_connection());

        let rejected = LinkError::Rejected {
            address: "HR10".to_string(),
            message: "Modbus exception IllegalDataAddress".to_string(),
        };
        assert!(!rejected.breaks_connection());

        let read = LinkError::Read {
            address: "HR10".to_string(),
            message: "Connection reset by peer".to_string(),
        };
        assert!(read.breaks_connection());
    }

    #[test]
    fn test_link_error_message_carries_raw_text() {
        let err = LinkError::Write {
            address: "HR100.1".to_string(),
            message: "Broken pipe".to_string(),
        };
        assert_eq!(err.to_string(), "Write HR100.1 failed: Broken pipe");
    }

    #[test]
    fn test_mismatch_display() {
        let err = ValidationMismatchError {
            local: TestResult::Pass,
            reported: ReportedResult::Fail,
        };
        assert_eq!(
            err.to_string(),
            "Validation mismatch: local result PASS, PLC reported FAIL"
        );
    }

    #[test]
    fn test_mes_error_classification() {
        assert!(MesError::Transport("timeout".into()).is_transport());
        assert!(!MesError::Rejected {
            code: 3,
            message: "route check failed".into()
        }
        .is_transport());
    }
}
