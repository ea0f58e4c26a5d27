//! Database module for SQLite operations.
//!
//! This module provides the `Database` struct and all database operations
//! organized into submodules by domain.

mod documents;
mod events;
mod migrations;
pub mod models;
mod sections;
mod sentences;
mod tasks;

pub use models::{
    Classification, ClassificationOutcome, Document, DocumentStatus, DocumentStatusReport,
    NewSection, NewSentence, Section, Sentence, Stage, StageFlags, Task, TaskError, TaskEvent,
    TaskStatus,
};
pub use documents::Admission;
pub use tasks::{FailOutcome, NewTask};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{DatabaseError, ServiceError, ServiceResult};

/// Database manager for SQLite operations
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> ServiceResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ServiceError::Database(DatabaseError::Connection(
                    rusqlite::Error::ToSqlConversionFailure(Box::new(e)),
                ))
            })?;
        }

        let conn = Connection::open(path).map_err(DatabaseError::Connection)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(DatabaseError::Query)?;

        Self::from_connection(conn)
    }

    /// Open a private in-memory database (tests and dry runs)
    pub fn open_in_memory() -> ServiceResult<Self> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::Connection)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(DatabaseError::Query)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> ServiceResult<Self> {
        // Run all migrations
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection. Every statement runs under this lock, which is what
    /// makes multi-statement operations such as task claims atomic.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cheap liveness check for the health endpoint
    pub fn ping(&self) -> ServiceResult<()> {
        self.conn()
            .query_row("SELECT 1", [], |_| Ok(()))
            .map_err(DatabaseError::Query)?;
        Ok(())
    }
}

/// Timestamps are stored as fixed-width RFC 3339 strings so that SQL string
/// comparison orders them chronologically.
pub(crate) fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_optional_timestamp(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_timestamp)
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;

    use super::models::{Document, DocumentStatus, StageFlags};

    pub(crate) fn sample_document(id: &str, hash: &str) -> Document {
        let now = Utc::now();
        Document {
            id: id.to_string(),
            title: format!("Document {}", id),
            content_hash: hash.to_string(),
            status: DocumentStatus::Processing,
            stage_flags: StageFlags::default(),
            error_message: None,
            error_recoverable: false,
            blob_path: None,
            size_bytes: 42,
            created_at: now,
            updated_at: now,
        }
    }
}
