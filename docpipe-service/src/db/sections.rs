//! Section operations.

use chrono::Utc;
use rusqlite::params;

use super::models::{NewSection, Section};
use super::{Database, timestamp};
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    /// Insert the sections of a document in one transaction, in the given order.
    ///
    /// Returns the number of sections written. Re-running for a document that
    /// already has sections writes nothing, so a retried section-store stage
    /// never duplicates rows.
    pub fn insert_sections(&self, document_id: &str, sections: &[NewSection]) -> ServiceResult<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let existing: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM sections WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;
        if existing > 0 {
            return Ok(0);
        }

        let now = timestamp(Utc::now());
        for (order, section) in sections.iter().enumerate() {
            let word_count = section.content.split_whitespace().count() as i64;
            tx.execute(
                r#"
                INSERT INTO sections (id, document_id, section_type, section_order, content, word_count, page_start, page_end, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    uuid::Uuid::new_v4().to_string(),
                    document_id,
                    section.section_type,
                    order as i64,
                    section.content,
                    word_count,
                    section.page_start,
                    section.page_end,
                    now,
                ],
            )
            .map_err(DatabaseError::Query)?;
        }

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(sections.len())
    }

    /// Get the sections of a document, in document order
    pub fn get_sections(&self, document_id: &str) -> ServiceResult<Vec<Section>> {
        let conn = self.conn();

        let mut stmt = conn
            .prepare(
                "SELECT id, document_id, section_type, section_order, content, word_count, page_start, page_end \
                 FROM sections WHERE document_id = ?1 ORDER BY section_order",
            )
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(params![document_id], Section::from_row)
            .map_err(DatabaseError::Query)?;

        let mut sections = Vec::new();
        for row in rows {
            sections.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(sections)
    }
}
