use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(EmployeeId);
id_newtype!(OrgId);
id_newtype!(EventId);

/// Clocked-in or clocked-out. Stored as `"in"` / `"out"` in the ledger and
/// on the wire; `Out` is the default for an employee with no events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn flipped(self) -> Direction {
        match self {
            Direction::In => Direction::Out,
            Direction::Out => Direction::In,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub org_id: OrgId,
    pub name: String,
    pub active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Employee {
    /// Eligible iff active and not soft-deleted.
    pub fn is_eligible(&self) -> bool {
        self.active && self.deleted_at.is_none()
    }
}

/// One immutable row of the attendance ledger. `created_at` is assigned by
/// the store at write time; ties are broken by `id` (insertion order).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub id: EventId,
    pub employee_id: EmployeeId,
    pub org_id: OrgId,
    pub direction: Direction,
    pub created_at: DateTime<Utc>,
}
