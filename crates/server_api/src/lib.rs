use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
};

use shared::{
    domain::{AttendanceEvent, Direction, Employee, EmployeeId, OrgId},
    error::{ApiError, ErrorCode, LedgerCorruption},
    protocol::{AuditFinding, EmployeeStatus, EmployeeSummary, ToggleReceipt},
};
use storage::Storage;
use tokio::sync::Mutex as AsyncMutex;

/// Retry budget for a toggle whose conditional append loses a race at the
/// store. The per-employee lock makes such races impossible within one
/// process; the budget covers writers that reach the database directly.
const MAX_TOGGLE_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub locks: ToggleLocks,
}

impl ApiContext {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            locks: ToggleLocks::default(),
        }
    }
}

/// Per-employee critical sections. Toggles for the same employee serialize
/// on one async mutex; toggles for different employees never contend.
#[derive(Clone, Default)]
pub struct ToggleLocks {
    inner: Arc<StdMutex<HashMap<EmployeeId, Arc<AsyncMutex<()>>>>>,
}

impl ToggleLocks {
    fn for_employee(&self, employee_id: EmployeeId) -> Arc<AsyncMutex<()>> {
        let mut registry = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        registry.entry(employee_id).or_default().clone()
    }
}

/// Current direction projected from the most recent ledger event, `Out`
/// when the employee has never clocked.
pub fn status_of(latest: Option<&AttendanceEvent>) -> Direction {
    latest.map(|event| event.direction).unwrap_or(Direction::Out)
}

/// Applies `status_of` over a batched latest-event read, in roster order.
pub fn statuses_for(
    employees: &[Employee],
    latest: &HashMap<EmployeeId, AttendanceEvent>,
) -> Vec<EmployeeStatus> {
    employees
        .iter()
        .map(|employee| EmployeeStatus {
            employee_id: employee.id,
            direction: status_of(latest.get(&employee.id)),
        })
        .collect()
}

/// Position of the first alternation violation in a ledger history, oldest
/// event first: an opening event that is not `In`, or an adjacent pair with
/// equal directions. `None` for a clean ledger.
pub fn check_alternation(events: &[AttendanceEvent]) -> Option<usize> {
    if events.first().map(|event| event.direction) == Some(Direction::Out) {
        return Some(0);
    }
    events
        .windows(2)
        .position(|pair| pair[0].direction == pair[1].direction)
        .map(|index| index + 1)
}

/// Roster gate: active, non-deleted employees of the organization, sorted
/// by name.
pub async fn eligible_employees(
    ctx: &ApiContext,
    org_id: OrgId,
) -> Result<Vec<EmployeeSummary>, ApiError> {
    let employees = ctx
        .storage
        .list_active_employees(org_id)
        .await
        .map_err(unavailable)?;
    Ok(employees
        .into_iter()
        .map(|employee| EmployeeSummary {
            employee_id: employee.id,
            org_id: employee.org_id,
            name: employee.name,
        })
        .collect())
}

/// The whole kiosk read path: one roster query plus one batched
/// latest-event query, then a pure projection.
pub async fn statuses(ctx: &ApiContext, org_id: OrgId) -> Result<Vec<EmployeeStatus>, ApiError> {
    let employees = ctx
        .storage
        .list_active_employees(org_id)
        .await
        .map_err(unavailable)?;
    let latest = ctx
        .storage
        .latest_events_for_org(org_id)
        .await
        .map_err(unavailable)?;
    Ok(statuses_for(&employees, &latest))
}

/// Appends the alternate-direction event for the employee and returns the
/// receipt. Exactly one event is persisted per successful call.
pub async fn toggle(
    ctx: &ApiContext,
    employee_id: EmployeeId,
    org_id: OrgId,
) -> Result<ToggleReceipt, ApiError> {
    ensure_eligible(ctx, employee_id, org_id).await?;

    let lock = ctx.locks.for_employee(employee_id);
    let _guard = lock.lock().await;

    for attempt in 1..=MAX_TOGGLE_ATTEMPTS {
        let latest = ctx
            .storage
            .latest_event_for(employee_id)
            .await
            .map_err(unavailable)?;
        let direction = status_of(latest.as_ref()).flipped();
        let expected = latest.map(|event| event.id);

        match ctx
            .storage
            .append_event(employee_id, org_id, direction, expected)
            .await
            .map_err(unavailable)?
        {
            Some(event) => {
                return Ok(ToggleReceipt {
                    employee_id: event.employee_id,
                    direction: event.direction,
                    created_at: event.created_at,
                })
            }
            None => {
                tracing::warn!(
                    employee_id = employee_id.0,
                    attempt,
                    "conditional append lost a race, re-reading latest event"
                );
            }
        }
    }

    Err(ApiError::new(
        ErrorCode::ConflictRetryExhausted,
        "toggle retry budget exhausted",
    ))
}

/// Diagnostic scan over every employee with ledger entries in the
/// organization. Violations are logged and reported, never repaired.
pub async fn audit_org(ctx: &ApiContext, org_id: OrgId) -> Result<Vec<AuditFinding>, ApiError> {
    let employee_ids = ctx
        .storage
        .employees_with_events(org_id)
        .await
        .map_err(unavailable)?;

    let mut findings = Vec::new();
    for employee_id in employee_ids {
        let events = ctx
            .storage
            .events_for_employee(employee_id)
            .await
            .map_err(unavailable)?;
        if let Some(position) = check_alternation(&events) {
            let corruption = LedgerCorruption {
                employee_id,
                position,
            };
            tracing::error!(%corruption, "attendance ledger failed alternation audit");
            findings.push(AuditFinding {
                employee_id,
                position,
            });
        }
    }
    Ok(findings)
}

async fn ensure_eligible(
    ctx: &ApiContext,
    employee_id: EmployeeId,
    org_id: OrgId,
) -> Result<Employee, ApiError> {
    let Some(employee) = ctx
        .storage
        .employee(employee_id)
        .await
        .map_err(unavailable)?
    else {
        return Err(ApiError::new(ErrorCode::NotEligible, "unknown employee"));
    };
    if employee.org_id != org_id {
        return Err(ApiError::new(
            ErrorCode::NotEligible,
            "employee belongs to another organization",
        ));
    }
    if !employee.is_eligible() {
        return Err(ApiError::new(
            ErrorCode::NotEligible,
            "employee is inactive or deleted",
        ));
    }
    Ok(employee)
}

fn unavailable(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Unavailable, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
