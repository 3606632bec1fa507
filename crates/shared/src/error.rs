use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::EmployeeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Employee is inactive, soft-deleted, unknown, or belongs to another
    /// organization; the toggle was refused and nothing was written.
    NotEligible,
    /// The bounded conflict-retry budget ran out without a committed append.
    ConflictRetryExhausted,
    /// The ledger store could not be read or written.
    Unavailable,
    Validation,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Diagnostic, not part of the request/response taxonomy: an employee's
/// ledger broke strict alternation, which only a writer bypassing the
/// toggle coordinator can produce. Logged and reported, never repaired.
#[derive(Debug, Clone, Error)]
#[error("attendance ledger for employee {} breaks alternation at position {position}", employee_id.0)]
pub struct LedgerCorruption {
    pub employee_id: EmployeeId,
    pub position: usize,
}
