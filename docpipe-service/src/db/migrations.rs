//! Database schema migrations.
//!
//! This module contains all database migrations and schema setup.

use rusqlite::Connection;

use crate::error::{DatabaseError, ServiceResult};

/// Run all database migrations.
///
/// This function is called during database initialization to ensure
/// the schema is up to date.
pub(super) fn run_migrations(conn: &Connection) -> ServiceResult<()> {
    // Initial schema setup
    conn.execute_batch(
        r#"
        -- Documents table (root of every cascade)
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content_hash TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'uploading',
            structured INTEGER NOT NULL DEFAULT 0,
            sectioned INTEGER NOT NULL DEFAULT 0,
            segmented INTEGER NOT NULL DEFAULT 0,
            classified INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            error_recoverable INTEGER NOT NULL DEFAULT 0,
            blob_path TEXT,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);

        -- Sections produced by the structural parser
        CREATE TABLE IF NOT EXISTS sections (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            section_type TEXT NOT NULL,
            section_order INTEGER NOT NULL,
            content TEXT NOT NULL,
            word_count INTEGER NOT NULL,
            page_start INTEGER,
            page_end INTEGER,
            created_at TEXT NOT NULL,
            UNIQUE(document_id, section_order),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        );

        -- Sentences and their classification state
        CREATE TABLE IF NOT EXISTS sentences (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            section_id TEXT NOT NULL,
            sentence_order INTEGER NOT NULL,
            content TEXT NOT NULL,
            classification TEXT NOT NULL DEFAULT 'unknown',
            labels TEXT NOT NULL DEFAULT '{}',
            retry_count INTEGER NOT NULL DEFAULT 0,
            explanation TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(section_id, sentence_order),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE,
            FOREIGN KEY (section_id) REFERENCES sections(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_sentences_document ON sentences(document_id, classification);
        CREATE INDEX IF NOT EXISTS idx_sentences_section ON sentences(section_id);

        -- Stage tasks. parent_task_id is a plain lookup column, not a foreign key.
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            stage TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            priority INTEGER NOT NULL DEFAULT 0,
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL,
            timeout_seconds INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            available_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT,
            error_message TEXT,
            result TEXT,
            parent_task_id TEXT,
            CHECK (retry_count <= max_retries),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_claim ON tasks(status, priority DESC, created_at);
        CREATE INDEX IF NOT EXISTS idx_tasks_document ON tasks(document_id);

        -- Append-only progress log
        CREATE TABLE IF NOT EXISTS task_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            step INTEGER NOT NULL,
            total_steps INTEGER NOT NULL,
            percentage REAL NOT NULL,
            message TEXT NOT NULL,
            details TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_task_events_task ON task_events(task_id);

        -- Append-only error log
        CREATE TABLE IF NOT EXISTS task_errors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL,
            error_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            recoverable INTEGER NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_task_errors_task ON task_errors(task_id);
    "#,
    )
    .map_err(|e| DatabaseError::Migration {
        message: e.to_string(),
    })?;

    Ok(())
}
