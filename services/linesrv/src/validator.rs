//! Parameter limit validation
//!
//! Measured values and limits are positional: value `i` is checked against
//! limit `i`. Bounds are inclusive on both ends.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LineSrvError, Result, ValidationMismatchError};

/// Pass/fail verdict, serialized the way the MES expects it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestResult {
    Pass,
    Fail,
}

impl TestResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestResult::Pass => "PASS",
            TestResult::Fail => "FAIL",
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, TestResult::Pass)
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict derived from the PLC's OK/NG counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportedResult {
    Pass,
    Fail,
    Unknown,
}

impl ReportedResult {
    /// Exactly one counter must be non-zero; anything else is `Unknown`.
    pub fn from_counters(ok_count: u16, ng_count: u16) -> Self {
        match (ok_count != 0, ng_count != 0) {
            (true, false) => ReportedResult::Pass,
            (false, true) => ReportedResult::Fail,
            _ => ReportedResult::Unknown,
        }
    }
}

impl fmt::Display for ReportedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportedResult::Pass => f.write_str("PASS"),
            ReportedResult::Fail => f.write_str("FAIL"),
            ReportedResult::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// Inclusive `[lower, upper]` bound
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub lower: f64,
    pub upper: f64,
}

impl Limit {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// NaN never passes.
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// Outcome of one validation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub per_parameter: Vec<TestResult>,
    pub aggregate: TestResult,
}

/// Stateless limit checker
pub struct LimitValidator;

impl LimitValidator {
    /// Check every measured value against its positional limit.
    ///
    /// An empty parameter list passes.
    pub fn validate(measured: &[f64], limits: &[Limit]) -> Result<ValidationReport> {
        if measured.len() != limits.len() {
            return Err(LineSrvError::validation(format!(
                "{} measured values for {} limits",
                measured.len(),
                limits.len()
            )));
        }

        let per_parameter: Vec<TestResult> = measured
            .iter()
            .zip(limits)
            .map(|(value, limit)| {
                if limit.contains(*value) {
                    TestResult::Pass
                } else {
                    TestResult::Fail
                }
            })
            .collect();

        let aggregate = if per_parameter.iter().all(TestResult::is_pass) {
            TestResult::Pass
        } else {
            TestResult::Fail
        };

        Ok(ValidationReport {
            per_parameter,
            aggregate,
        })
    }

    /// Compare the local verdict with the PLC's.
    ///
    /// `Unknown` from the PLC counts as disagreement; neither side is trusted over the other.
    pub fn reconcile(
        local: TestResult,
        reported: ReportedResult,
    ) -> std::result::Result<(), ValidationMismatchError> {
        let agrees = matches!(
            (local, reported),
            (TestResult::Pass, ReportedResult::Pass) | (TestResult::Fail, ReportedResult::Fail)
        );
        if agrees {
            Ok(())
        } else {
            Err(ValidationMismatchError { local, reported })
        }
    }
}
