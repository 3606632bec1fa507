use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Direction, EmployeeId, OrgId};

/// Roster gate output: one kiosk card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeSummary {
    pub employee_id: EmployeeId,
    pub org_id: OrgId,
    pub name: String,
}

/// Projected presence for one employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeStatus {
    pub employee_id: EmployeeId,
    pub direction: Direction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleRequest {
    pub employee_id: EmployeeId,
    pub org_id: OrgId,
}

/// Returned after a successful toggle; `created_at` is the server-assigned
/// timestamp of the appended event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleReceipt {
    pub employee_id: EmployeeId,
    pub direction: Direction,
    pub created_at: DateTime<Utc>,
}

/// Diagnostic: position of the first alternation violation in an employee's
/// ledger, counted from the oldest event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditFinding {
    pub employee_id: EmployeeId,
    pub position: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    StatusChanged {
        org_id: OrgId,
        status: EmployeeStatus,
    },
}
