//! Task queue operations.
//!
//! Tasks are claimed with a single conditional `UPDATE ... RETURNING` while the
//! connection lock is held, so a pending task is handed to exactly one caller.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::time::Duration;

use super::models::{Stage, Task, TaskStatus};
use super::{Database, timestamp};
use crate::error::{DatabaseError, ServiceError, ServiceResult};

/// A task about to be enqueued
#[derive(Debug, Clone, Copy)]
pub struct NewTask<'a> {
    pub document_id: &'a str,
    pub stage: Stage,
    pub priority: i64,
    pub parent_task_id: Option<&'a str>,
    pub max_retries: u32,
    pub timeout_seconds: u64,
}

/// What `fail` did with a task
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    /// Back in the queue, claimable from `available_at`
    Requeued {
        retry_count: u32,
        available_at: DateTime<Utc>,
    },
    /// Terminal; the document must be marked as failed
    Failed,
    /// The task was no longer processing (completed, swept or already
    /// failed), so nothing changed
    NotProcessing,
}

impl Database {
    /// Add a pending task for a document stage, claimable immediately
    pub fn enqueue_task(
        &self,
        document_id: &str,
        stage: Stage,
        priority: i64,
        parent_task_id: Option<&str>,
        max_retries: u32,
        timeout_seconds: u64,
    ) -> ServiceResult<Task> {
        let conn = self.conn();
        insert_task(
            &conn,
            NewTask {
                document_id,
                stage,
                priority,
                parent_task_id,
                max_retries,
                timeout_seconds,
            },
        )
    }

    /// Claim the next runnable task across all documents.
    ///
    /// Highest priority first, then oldest, then insertion order.
    pub fn claim_task(&self) -> ServiceResult<Option<Task>> {
        self.claim_where(None)
    }

    /// Claim the next runnable task of one document
    pub fn claim_task_for_document(&self, document_id: &str) -> ServiceResult<Option<Task>> {
        self.claim_where(Some(document_id))
    }

    fn claim_where(&self, document_id: Option<&str>) -> ServiceResult<Option<Task>> {
        let conn = self.conn();
        let now = timestamp(Utc::now());

        let sql = format!(
            r#"
            UPDATE tasks SET status = 'processing', started_at = ?1
            WHERE id = (
                SELECT id FROM tasks
                WHERE status = 'pending' AND available_at <= ?1
                  AND (?2 IS NULL OR document_id = ?2)
                ORDER BY priority DESC, created_at ASC, rowid ASC
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING {}
            "#,
            Task::COLUMNS
        );

        conn.query_row(&sql, params![now, document_id], Task::from_row)
            .optional()
            .map_err(DatabaseError::Query)
            .map_err(Into::into)
    }

    /// Mark a processing task as completed, storing the stage output
    pub fn complete_task(
        &self,
        task_id: &str,
        result: Option<&serde_json::Value>,
    ) -> ServiceResult<bool> {
        let result = result
            .map(serde_json::to_string)
            .transpose()
            .map_err(DatabaseError::Serialization)?;
        let conn = self.conn();

        let rows = conn
            .execute(
                "UPDATE tasks SET status = 'completed', finished_at = ?1, result = ?2, error_message = NULL \
                 WHERE id = ?3 AND status = 'processing'",
                params![timestamp(Utc::now()), result, task_id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Record a failed attempt of a processing task.
    ///
    /// A recoverable failure with retries left goes back to pending after
    /// `retry_delay` with its retry count incremented. Anything else is terminal.
    /// A task that is not processing is left untouched.
    pub fn fail_task(
        &self,
        task_id: &str,
        message: &str,
        recoverable: bool,
        retry_delay: Duration,
    ) -> ServiceResult<FailOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let state: Option<(String, i64, i64)> = tx
            .query_row(
                "SELECT status, retry_count, max_retries FROM tasks WHERE id = ?1",
                params![task_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        let Some((status, retry_count, max_retries)) = state else {
            return Err(ServiceError::TaskNotFound {
                task_id: task_id.to_string(),
            });
        };
        if TaskStatus::from_str(&status) != TaskStatus::Processing {
            return Ok(FailOutcome::NotProcessing);
        }

        let outcome = fail_processing(
            &tx,
            task_id,
            message,
            recoverable && retry_count < max_retries,
            retry_count,
            retry_delay,
        )?;

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(outcome)
    }

    /// Return tasks that made no progress for their timeout to the queue.
    ///
    /// Progress is the later of `started_at` and the task's newest event, so a
    /// long stage that keeps reporting is never swept. The lost attempt counts
    /// as a retry; tasks with none left are failed. Selection and failing
    /// happen in one transaction, so a task completed concurrently is skipped.
    pub fn requeue_stale_tasks(&self, now: DateTime<Utc>) -> ServiceResult<Vec<(Task, FailOutcome)>> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let stale: Vec<Task> = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {}, (SELECT MAX(e.created_at) FROM task_events e WHERE e.task_id = tasks.id) \
                     FROM tasks WHERE status = 'processing'",
                    Task::COLUMNS
                ))
                .map_err(DatabaseError::Query)?;
            let rows = stmt
                .query_map([], |row| {
                    let last_event: Option<String> = row.get(15)?;
                    Ok((Task::from_row(row)?, last_event))
                })
                .map_err(DatabaseError::Query)?;

            let mut stale = Vec::new();
            for row in rows {
                let (task, last_event) = row.map_err(DatabaseError::Query)?;
                let started = task.started_at.unwrap_or(task.created_at);
                let last_progress = super::parse_optional_timestamp(last_event)
                    .map_or(started, |event_at| event_at.max(started));
                let deadline =
                    last_progress + chrono::Duration::seconds(task.timeout_seconds as i64);
                if deadline < now {
                    stale.push(task);
                }
            }
            stale
        };

        let mut swept = Vec::with_capacity(stale.len());
        for task in stale {
            let outcome = fail_processing(
                &tx,
                &task.id,
                "task exceeded its timeout while processing",
                task.retry_count < task.max_retries,
                task.retry_count as i64,
                Duration::ZERO,
            )?;
            swept.push((task, outcome));
        }

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(swept)
    }

    /// Get a task by ID
    pub fn get_task(&self, task_id: &str) -> ServiceResult<Option<Task>> {
        let conn = self.conn();

        conn.query_row(
            &format!("SELECT {} FROM tasks WHERE id = ?1", Task::COLUMNS),
            params![task_id],
            Task::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// All tasks of a document, oldest first
    pub fn list_tasks_for_document(&self, document_id: &str) -> ServiceResult<Vec<Task>> {
        let conn = self.conn();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM tasks WHERE document_id = ?1 ORDER BY created_at ASC, rowid ASC",
                Task::COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(params![document_id], Task::from_row)
            .map_err(DatabaseError::Query)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(tasks)
    }

    /// Most recent task of a document for one stage
    pub fn latest_task_for_stage(
        &self,
        document_id: &str,
        stage: Stage,
    ) -> ServiceResult<Option<Task>> {
        let conn = self.conn();

        conn.query_row(
            &format!(
                "SELECT {} FROM tasks WHERE document_id = ?1 AND stage = ?2 \
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                Task::COLUMNS
            ),
            params![document_id, stage.as_ref()],
            Task::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Whether the document has a pending or processing task
    pub fn has_active_task(&self, document_id: &str) -> ServiceResult<bool> {
        let conn = self.conn();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE document_id = ?1 AND status IN ('pending', 'processing')",
                params![document_id],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;

        Ok(count > 0)
    }

    /// When the document's next pending task becomes claimable
    pub fn next_pending_available_at(
        &self,
        document_id: &str,
    ) -> ServiceResult<Option<DateTime<Utc>>> {
        let conn = self.conn();

        let available_at: Option<String> = conn
            .query_row(
                "SELECT MIN(available_at) FROM tasks WHERE document_id = ?1 AND status = 'pending'",
                params![document_id],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;

        Ok(super::parse_optional_timestamp(available_at))
    }

    /// Most recent terminally failed task of a document
    pub fn latest_failed_task(&self, document_id: &str) -> ServiceResult<Option<Task>> {
        let conn = self.conn();

        conn.query_row(
            &format!(
                "SELECT {} FROM tasks WHERE document_id = ?1 AND status = 'failed' \
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                Task::COLUMNS
            ),
            params![document_id],
            Task::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }
}

/// Insert a pending task on an open connection or transaction
pub(super) fn insert_task(conn: &Connection, new: NewTask<'_>) -> ServiceResult<Task> {
    let now = Utc::now();
    let task = Task {
        id: uuid::Uuid::new_v4().to_string(),
        document_id: new.document_id.to_string(),
        stage: new.stage,
        status: TaskStatus::Pending,
        priority: new.priority,
        retry_count: 0,
        max_retries: new.max_retries,
        timeout_seconds: new.timeout_seconds,
        created_at: now,
        available_at: now,
        started_at: None,
        finished_at: None,
        error_message: None,
        result: None,
        parent_task_id: new.parent_task_id.map(str::to_string),
    };

    conn.execute(
        r#"
        INSERT INTO tasks (id, document_id, stage, status, priority, retry_count, max_retries, timeout_seconds, created_at, available_at, parent_task_id)
        VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8, ?8, ?9)
        "#,
        params![
            task.id,
            task.document_id,
            task.stage.as_ref(),
            task.status.as_str(),
            task.priority,
            task.max_retries as i64,
            task.timeout_seconds as i64,
            timestamp(now),
            task.parent_task_id,
        ],
    )
    .map_err(DatabaseError::Query)?;

    Ok(task)
}

/// Requeue or terminally fail a task, only while it is still processing
fn fail_processing(
    tx: &rusqlite::Transaction<'_>,
    task_id: &str,
    message: &str,
    requeue: bool,
    retry_count: i64,
    retry_delay: Duration,
) -> ServiceResult<FailOutcome> {
    let now = Utc::now();

    if requeue {
        let available_at =
            now + chrono::Duration::from_std(retry_delay).unwrap_or(chrono::Duration::zero());
        let rows = tx
            .execute(
                "UPDATE tasks SET status = 'pending', retry_count = retry_count + 1, available_at = ?1, \
                 started_at = NULL, error_message = ?2 WHERE id = ?3 AND status = 'processing'",
                params![timestamp(available_at), message, task_id],
            )
            .map_err(DatabaseError::Query)?;
        if rows == 0 {
            return Ok(FailOutcome::NotProcessing);
        }
        return Ok(FailOutcome::Requeued {
            retry_count: (retry_count + 1) as u32,
            available_at,
        });
    }

    let rows = tx
        .execute(
            "UPDATE tasks SET status = 'failed', finished_at = ?1, error_message = ?2 \
             WHERE id = ?3 AND status = 'processing'",
            params![timestamp(now), message, task_id],
        )
        .map_err(DatabaseError::Query)?;
    if rows == 0 {
        return Ok(FailOutcome::NotProcessing);
    }
    Ok(FailOutcome::Failed)
}
