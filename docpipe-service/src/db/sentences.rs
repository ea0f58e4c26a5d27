//! Sentence operations.
//!
//! Classification only moves forward. The guards live in the `WHERE` clauses:
//! a sentence can be marked pending only from unknown or pending, and an
//! outcome can be recorded only while it is pending.

use chrono::Utc;
use rusqlite::params;

use super::models::{Classification, ClassificationOutcome, NewSentence, Sentence};
use super::{Database, timestamp};
use crate::error::{DatabaseError, ServiceResult};

const SENTENCE_COLUMNS: &str = "id, document_id, section_id, sentence_order, content, classification, labels, retry_count, explanation";

impl Database {
    /// Insert the sentences of one section as `unknown`.
    ///
    /// Returns the number written; a section that already has sentences is left alone.
    pub fn insert_sentences(
        &self,
        document_id: &str,
        section_id: &str,
        sentences: &[NewSentence],
    ) -> ServiceResult<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let existing: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM sentences WHERE section_id = ?1",
                params![section_id],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;
        if existing > 0 {
            return Ok(0);
        }

        let now = timestamp(Utc::now());
        for sentence in sentences {
            tx.execute(
                r#"
                INSERT INTO sentences (id, document_id, section_id, sentence_order, content, classification, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, 'unknown', ?6, ?6)
                "#,
                params![
                    uuid::Uuid::new_v4().to_string(),
                    document_id,
                    section_id,
                    sentence.order,
                    sentence.content,
                    now,
                ],
            )
            .map_err(DatabaseError::Query)?;
        }

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(sentences.len())
    }

    /// Sentences of a section that still need a classifier call.
    ///
    /// Includes `pending` rows so work interrupted by a crash is picked up again.
    pub fn get_sentences_to_classify(&self, section_id: &str) -> ServiceResult<Vec<Sentence>> {
        self.query_sentences(
            &format!(
                "SELECT {} FROM sentences WHERE section_id = ?1 \
                 AND classification IN ('unknown', 'pending') ORDER BY sentence_order",
                SENTENCE_COLUMNS
            ),
            section_id,
        )
    }

    /// All sentences of a document in reading order
    pub fn get_sentences(&self, document_id: &str) -> ServiceResult<Vec<Sentence>> {
        self.query_sentences(
            "SELECT s.id, s.document_id, s.section_id, s.sentence_order, s.content, s.classification, \
             s.labels, s.retry_count, s.explanation \
             FROM sentences s JOIN sections sec ON sec.id = s.section_id \
             WHERE s.document_id = ?1 ORDER BY sec.section_order, s.sentence_order",
            document_id,
        )
    }

    fn query_sentences(&self, sql: &str, key: &str) -> ServiceResult<Vec<Sentence>> {
        let conn = self.conn();

        let mut stmt = conn.prepare(sql).map_err(DatabaseError::Query)?;
        let rows = stmt
            .query_map(params![key], Sentence::from_row)
            .map_err(DatabaseError::Query)?;

        let mut sentences = Vec::new();
        for row in rows {
            sentences.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(sentences)
    }

    /// Move a sentence to `pending` before its classifier call
    pub fn mark_sentence_pending(&self, sentence_id: &str) -> ServiceResult<bool> {
        let conn = self.conn();

        let rows = conn
            .execute(
                "UPDATE sentences SET classification = 'pending', updated_at = ?1 \
                 WHERE id = ?2 AND classification IN ('unknown', 'pending')",
                params![timestamp(Utc::now()), sentence_id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Store the final classification of a pending sentence
    pub fn record_sentence_outcome(
        &self,
        sentence_id: &str,
        outcome: &ClassificationOutcome,
    ) -> ServiceResult<bool> {
        let labels = serde_json::to_string(&outcome.labels).map_err(DatabaseError::Serialization)?;
        let conn = self.conn();

        let rows = conn
            .execute(
                "UPDATE sentences SET classification = ?1, labels = ?2, retry_count = ?3, explanation = ?4, updated_at = ?5 \
                 WHERE id = ?6 AND classification = 'pending'",
                params![
                    outcome.classification.as_str(),
                    labels,
                    outcome.retry_count as i64,
                    outcome.explanation,
                    timestamp(Utc::now()),
                    sentence_id,
                ],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Number of sentences of a document in the given classification
    pub fn count_sentences_by_classification(
        &self,
        document_id: &str,
        classification: Classification,
    ) -> ServiceResult<u64> {
        let conn = self.conn();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sentences WHERE document_id = ?1 AND classification = ?2",
                params![document_id, classification.as_str()],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;

        Ok(count.max(0) as u64)
    }

    /// Total sentences of a document
    pub fn count_sentences(&self, document_id: &str) -> ServiceResult<u64> {
        let conn = self.conn();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sentences WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;

        Ok(count.max(0) as u64)
    }
}
