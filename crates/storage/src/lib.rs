use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{AttendanceEvent, Direction, Employee, EmployeeId, EventId, OrgId};

/// SQLite-backed store for the employee roster and the attendance ledger.
///
/// The `attendance_events` table is append-only: this crate contains no
/// UPDATE or DELETE against it, and every read derives state from the rows
/// as written.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    // ---- roster (written by the external employee directory) ----

    pub async fn add_employee(&self, org_id: OrgId, name: &str) -> Result<Employee> {
        let row = sqlx::query(
            "INSERT INTO employees (org_id, name) VALUES (?, ?)
             RETURNING id, org_id, name, active, deleted_at",
        )
        .bind(org_id.0)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(employee_from_row(&row))
    }

    pub async fn set_employee_active(&self, employee_id: EmployeeId, active: bool) -> Result<()> {
        sqlx::query("UPDATE employees SET active = ? WHERE id = ?")
            .bind(active)
            .bind(employee_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Soft delete: stamps `deleted_at`, keeps the row so historic ledger
    /// entries stay resolvable.
    pub async fn soft_delete_employee(&self, employee_id: EmployeeId) -> Result<()> {
        sqlx::query(
            "UPDATE employees SET deleted_at = CURRENT_TIMESTAMP
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(employee_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn employee(&self, employee_id: EmployeeId) -> Result<Option<Employee>> {
        let row = sqlx::query(
            "SELECT id, org_id, name, active, deleted_at FROM employees WHERE id = ?",
        )
        .bind(employee_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| employee_from_row(&r)))
    }

    pub async fn list_active_employees(&self, org_id: OrgId) -> Result<Vec<Employee>> {
        let rows = sqlx::query(
            "SELECT id, org_id, name, active, deleted_at
             FROM employees
             WHERE org_id = ? AND active = 1 AND deleted_at IS NULL
             ORDER BY lower(name) ASC",
        )
        .bind(org_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(employee_from_row).collect())
    }

    // ---- attendance ledger ----

    /// Conditional append: commits only if the employee's newest event id
    /// still equals `expected_last` (`None` when no event had been observed).
    /// Returns `Ok(None)` when the condition no longer holds, i.e. another
    /// writer appended in between.
    pub async fn append_event(
        &self,
        employee_id: EmployeeId,
        org_id: OrgId,
        direction: Direction,
        expected_last: Option<EventId>,
    ) -> Result<Option<AttendanceEvent>> {
        let row = sqlx::query(
            "INSERT INTO attendance_events (employee_id, org_id, direction)
             SELECT ?1, ?2, ?3
             WHERE (SELECT COALESCE(MAX(id), 0) FROM attendance_events WHERE employee_id = ?1) = ?4
             RETURNING id, employee_id, org_id, direction, created_at",
        )
        .bind(employee_id.0)
        .bind(org_id.0)
        .bind(direction.as_str())
        .bind(expected_last.map(|id| id.0).unwrap_or(0))
        .fetch_optional(&self.pool)
        .await
        .context("failed to append attendance event")?;
        Ok(row.map(|r| event_from_row(&r)))
    }

    pub async fn latest_event_for(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Option<AttendanceEvent>> {
        let row = sqlx::query(
            "SELECT id, employee_id, org_id, direction, created_at
             FROM attendance_events
             WHERE employee_id = ?
             ORDER BY id DESC
             LIMIT 1",
        )
        .bind(employee_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| event_from_row(&r)))
    }

    /// Newest event per employee of the organization in one grouped query,
    /// semantically one `latest_event_for` per employee.
    pub async fn latest_events_for_org(
        &self,
        org_id: OrgId,
    ) -> Result<HashMap<EmployeeId, AttendanceEvent>> {
        let rows = sqlx::query(
            "SELECT e.id, e.employee_id, e.org_id, e.direction, e.created_at
             FROM attendance_events e
             INNER JOIN (
                 SELECT employee_id, MAX(id) AS latest_id
                 FROM attendance_events
                 WHERE org_id = ?
                 GROUP BY employee_id
             ) latest ON latest.latest_id = e.id",
        )
        .bind(org_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| {
                let event = event_from_row(r);
                (event.employee_id, event)
            })
            .collect())
    }

    /// Employees that have at least one ledger entry in the organization,
    /// whether or not they are still on the active roster.
    pub async fn employees_with_events(&self, org_id: OrgId) -> Result<Vec<EmployeeId>> {
        let rows = sqlx::query(
            "SELECT DISTINCT employee_id FROM attendance_events WHERE org_id = ? ORDER BY employee_id",
        )
        .bind(org_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| EmployeeId(r.get::<i64, _>(0)))
            .collect())
    }

    /// Full per-employee history in ledger order, oldest first.
    pub async fn events_for_employee(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Vec<AttendanceEvent>> {
        let rows = sqlx::query(
            "SELECT id, employee_id, org_id, direction, created_at
             FROM attendance_events
             WHERE employee_id = ?
             ORDER BY id ASC",
        )
        .bind(employee_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(event_from_row).collect())
    }
}

fn employee_from_row(row: &sqlx::sqlite::SqliteRow) -> Employee {
    Employee {
        id: EmployeeId(row.get::<i64, _>(0)),
        org_id: OrgId(row.get::<i64, _>(1)),
        name: row.get::<String, _>(2),
        active: row.get::<bool, _>(3),
        deleted_at: row.get::<Option<DateTime<Utc>>, _>(4),
    }
}

fn event_from_row(row: &sqlx::sqlite::SqliteRow) -> AttendanceEvent {
    AttendanceEvent {
        id: EventId(row.get::<i64, _>(0)),
        employee_id: EmployeeId(row.get::<i64, _>(1)),
        org_id: OrgId(row.get::<i64, _>(2)),
        direction: match row.get::<String, _>(3).as_str() {
            "in" => Direction::In,
            _ => Direction::Out,
        },
        created_at: row.get::<DateTime<Utc>, _>(4),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_file_path(database_url) else {
        return Ok(());
    };
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;
    Ok(())
}

fn sqlite_file_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }
    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if path.is_empty() {
        return None;
    }
    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
