//! Append-only task event and error logs.

use chrono::Utc;
use rusqlite::params;

use super::models::{TaskError, TaskEvent};
use super::{Database, timestamp};
use crate::error::{DatabaseError, ErrorSeverity, ServiceResult};

impl Database {
    /// Append a progress event to a task's log
    #[allow(clippy::too_many_arguments)]
    pub fn append_event(
        &self,
        task_id: &str,
        event_type: &str,
        step: u32,
        total_steps: u32,
        percentage: f64,
        message: &str,
        details: Option<&serde_json::Value>,
    ) -> ServiceResult<i64> {
        let details = details
            .map(serde_json::to_string)
            .transpose()
            .map_err(DatabaseError::Serialization)?;
        let conn = self.conn();

        conn.execute(
            r#"
            INSERT INTO task_events (task_id, event_type, step, total_steps, percentage, message, details, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                task_id,
                event_type,
                step as i64,
                total_steps as i64,
                percentage.clamp(0.0, 100.0),
                message,
                details,
                timestamp(Utc::now()),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(conn.last_insert_rowid())
    }

    /// Events of a task in the order they were written
    pub fn get_task_events(&self, task_id: &str) -> ServiceResult<Vec<TaskEvent>> {
        let conn = self.conn();

        let mut stmt = conn
            .prepare(
                "SELECT id, task_id, event_type, step, total_steps, percentage, message, details, created_at \
                 FROM task_events WHERE task_id = ?1 ORDER BY id",
            )
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(params![task_id], TaskEvent::from_row)
            .map_err(DatabaseError::Query)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(events)
    }

    /// Append an error row for a task
    pub fn record_task_error(
        &self,
        task_id: &str,
        error_type: &str,
        severity: ErrorSeverity,
        recoverable: bool,
        message: &str,
    ) -> ServiceResult<i64> {
        let conn = self.conn();

        conn.execute(
            r#"
            INSERT INTO task_errors (task_id, error_type, severity, recoverable, message, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                task_id,
                error_type,
                severity.as_str(),
                recoverable,
                message,
                timestamp(Utc::now()),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(conn.last_insert_rowid())
    }

    /// Errors of a task, oldest first
    pub fn get_task_errors(&self, task_id: &str) -> ServiceResult<Vec<TaskError>> {
        let conn = self.conn();

        let mut stmt = conn
            .prepare(
                "SELECT id, task_id, error_type, severity, recoverable, message, created_at \
                 FROM task_errors WHERE task_id = ?1 ORDER BY id",
            )
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(params![task_id], TaskError::from_row)
            .map_err(DatabaseError::Query)?;

        let mut errors = Vec::new();
        for row in rows {
            errors.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(errors)
    }
}
