//! Document operations.
//!
//! This module contains all document-related database operations including
//! hash-checked insert, status transitions and stage flags.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use super::models::{Document, DocumentStatus, Stage, StageFlags, Task};
use super::tasks::{NewTask, insert_task};
use super::{Database, timestamp};
use crate::error::{DatabaseError, ServiceResult};

/// Result of admitting an upload
#[derive(Debug, Clone)]
pub enum Admission {
    /// New document stored with its first task queued
    Created(Task),
    /// Content already known under this document id
    Duplicate(String),
}

impl Database {
    /// Insert a document unless one with the same content hash already exists.
    ///
    /// Returns the id of the existing document when the content is a duplicate.
    /// The lookup and insert run under one connection lock.
    pub fn insert_document_if_new(&self, doc: &Document) -> ServiceResult<Option<String>> {
        let conn = self.conn();

        if let Some(existing) = find_by_hash(&conn, &doc.content_hash)? {
            return Ok(Some(existing));
        }
        insert_document(&conn, doc)?;

        Ok(None)
    }

    /// Store a new document together with its first task.
    ///
    /// Both rows are written in one transaction, so a document is never
    /// visible without the task that drives it.
    pub fn admit_document(&self, doc: &Document, first: NewTask<'_>) -> ServiceResult<Admission> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        if let Some(existing) = find_by_hash(&tx, &doc.content_hash)? {
            return Ok(Admission::Duplicate(existing));
        }
        insert_document(&tx, doc)?;
        let task = insert_task(&tx, first)?;

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(Admission::Created(task))
    }

    /// Get a document by ID
    pub fn get_document(&self, id: &str) -> ServiceResult<Option<Document>> {
        let conn = self.conn();

        conn.query_row(
            &format!("SELECT {} FROM documents WHERE id = ?1", Document::COLUMNS),
            params![id],
            Document::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Find a document id by content hash
    pub fn get_document_by_hash(&self, content_hash: &str) -> ServiceResult<Option<String>> {
        let conn = self.conn();

        conn.query_row(
            "SELECT id FROM documents WHERE content_hash = ?1",
            params![content_hash],
            |row| row.get(0),
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Update document status. `error` and `recoverable` are overwritten, so a
    /// transition back to processing clears a previous failure.
    pub fn update_document_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
        error: Option<&str>,
        recoverable: bool,
    ) -> ServiceResult<bool> {
        let conn = self.conn();

        let rows = conn
            .execute(
                "UPDATE documents SET status = ?1, error_message = ?2, error_recoverable = ?3, updated_at = ?4 WHERE id = ?5",
                params![
                    status.as_str(),
                    error,
                    recoverable,
                    timestamp(Utc::now()),
                    document_id
                ],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Mark the artifacts of a stage as present
    pub fn set_stage_flag(&self, document_id: &str, stage: Stage) -> ServiceResult<bool> {
        let Some(column) = StageFlags::column(stage) else {
            return Ok(false);
        };
        let conn = self.conn();

        let rows = conn
            .execute(
                &format!(
                    "UPDATE documents SET {} = 1, updated_at = ?1 WHERE id = ?2",
                    column
                ),
                params![timestamp(Utc::now()), document_id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Forget the source blob once it has been removed from disk
    pub fn clear_blob_path(&self, document_id: &str) -> ServiceResult<bool> {
        let conn = self.conn();

        let rows = conn
            .execute(
                "UPDATE documents SET blob_path = NULL, updated_at = ?1 WHERE id = ?2",
                params![timestamp(Utc::now()), document_id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Delete a document and, through cascades, every row that belongs to it
    pub fn delete_document(&self, id: &str) -> ServiceResult<bool> {
        let conn = self.conn();

        let rows = conn
            .execute("DELETE FROM documents WHERE id = ?1", params![id])
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }
}

fn find_by_hash(conn: &Connection, content_hash: &str) -> ServiceResult<Option<String>> {
    conn.query_row(
        "SELECT id FROM documents WHERE content_hash = ?1",
        params![content_hash],
        |row| row.get(0),
    )
    .optional()
    .map_err(DatabaseError::Query)
    .map_err(Into::into)
}

fn insert_document(conn: &Connection, doc: &Document) -> ServiceResult<()> {
    conn.execute(
        r#"
        INSERT INTO documents (id, title, content_hash, status, structured, sectioned, segmented, classified, error_message, error_recoverable, blob_path, size_bytes, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
        params![
            doc.id,
            doc.title,
            doc.content_hash,
            doc.status.as_str(),
            doc.stage_flags.structured,
            doc.stage_flags.sectioned,
            doc.stage_flags.segmented,
            doc.stage_flags.classified,
            doc.error_message,
            doc.error_recoverable,
            doc.blob_path,
            doc.size_bytes as i64,
            timestamp(doc.created_at),
            timestamp(doc.updated_at),
        ],
    )
    .map_err(DatabaseError::Query)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::sample_document;

    #[test]
    fn test_insert_is_idempotent_by_hash() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(
            db.insert_document_if_new(&sample_document("a", "h1")).unwrap(),
            None
        );
        assert_eq!(
            db.insert_document_if_new(&sample_document("b", "h1")).unwrap(),
            Some("a".to_string())
        );
        assert!(db.get_document("b").unwrap().is_none());
        assert_eq!(db.get_document_by_hash("h1").unwrap(), Some("a".to_string()));
    }

    #[test]
    fn test_stage_flags_and_status() {
        let db = Database::open_in_memory().unwrap();
        db.insert_document_if_new(&sample_document("a", "h1")).unwrap();

        assert!(db.set_stage_flag("a", Stage::StructuralParse).unwrap());
        assert!(db.set_stage_flag("a", Stage::Segmentation).unwrap());
        assert!(!db.set_stage_flag("a", Stage::Finalize).unwrap());

        db.update_document_status("a", DocumentStatus::Error, Some("boom"), true)
            .unwrap();
        let doc = db.get_document("a").unwrap().unwrap();
        assert!(doc.stage_flags.structured);
        assert!(!doc.stage_flags.sectioned);
        assert!(doc.stage_flags.segmented);
        assert_eq!(doc.status, DocumentStatus::Error);
        assert_eq!(doc.error_message.as_deref(), Some("boom"));
        assert!(doc.error_recoverable);
    }

    fn first_task(document_id: &str) -> NewTask<'_> {
        NewTask {
            document_id,
            stage: Stage::StructuralParse,
            priority: 0,
            parent_task_id: None,
            max_retries: 3,
            timeout_seconds: 60,
        }
    }

    #[test]
    fn test_admit_stores_document_with_first_task() {
        let db = Database::open_in_memory().unwrap();
        let doc = sample_document("a", "h1");

        let Admission::Created(task) = db.admit_document(&doc, first_task("a")).unwrap() else {
            panic!("expected a new document");
        };
        assert_eq!(task.document_id, "a");
        assert_eq!(db.list_tasks_for_document("a").unwrap().len(), 1);

        let again = sample_document("b", "h1");
        assert!(matches!(
            db.admit_document(&again, first_task("b")).unwrap(),
            Admission::Duplicate(id) if id == "a"
        ));
        assert!(db.get_document("b").unwrap().is_none());
        assert_eq!(db.list_tasks_for_document("a").unwrap().len(), 1);
    }

    #[test]
    fn test_admit_rolls_back_when_task_insert_fails() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute_batch("ALTER TABLE tasks RENAME TO tasks_unavailable")
            .unwrap();

        assert!(db.admit_document(&sample_document("a", "h1"), first_task("a")).is_err());
        assert!(db.get_document("a").unwrap().is_none());
        assert_eq!(db.get_document_by_hash("h1").unwrap(), None);
    }

    #[test]
    fn test_delete_document() {
        let db = Database::open_in_memory().unwrap();
        db.insert_document_if_new(&sample_document("a", "h1")).unwrap();
        assert!(db.delete_document("a").unwrap());
        assert!(!db.delete_document("a").unwrap());
    }
}
