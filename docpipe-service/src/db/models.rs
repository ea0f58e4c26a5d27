//! Database model structs.
//!
//! This module contains the data structures for database records.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use super::{parse_optional_timestamp, parse_timestamp};

/// Lifecycle status of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Blob is being written, no task exists yet
    Uploading,
    /// Stage tasks are queued or running
    Processing,
    Completed,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploading => "uploading",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "uploading" => DocumentStatus::Uploading,
            "processing" => DocumentStatus::Processing,
            "completed" => DocumentStatus::Completed,
            _ => DocumentStatus::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Error)
    }
}

/// Pipeline stages, in execution order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumString,
    Display,
    AsRefStr,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    StructuralParse,
    SectionStore,
    Segmentation,
    Classification,
    Finalize,
}

impl Stage {
    pub const COUNT: usize = 5;

    pub fn first() -> Self {
        Stage::StructuralParse
    }

    /// The stage that follows this one, `None` after finalize
    pub fn next(&self) -> Option<Stage> {
        Stage::iter().skip_while(|s| s != self).nth(1)
    }

    /// 1-based position in the pipeline
    pub fn step_number(&self) -> usize {
        Stage::iter().position(|s| s == *self).unwrap_or(0) + 1
    }

    /// Whether the stage is made of independently bounded items, so its
    /// length scales with the document rather than with one call
    pub fn is_itemized(&self) -> bool {
        matches!(self, Stage::Classification)
    }
}

/// Completion flags for the artifact-producing stages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFlags {
    pub structured: bool,
    pub sectioned: bool,
    pub segmented: bool,
    pub classified: bool,
}

impl StageFlags {
    pub fn all_set(&self) -> bool {
        self.structured && self.sectioned && self.segmented && self.classified
    }

    /// Whether the given stage has already produced its artifacts.
    /// Finalize has no flag of its own; it is done when the document is completed.
    pub fn is_done(&self, stage: Stage) -> bool {
        match stage {
            Stage::StructuralParse => self.structured,
            Stage::SectionStore => self.sectioned,
            Stage::Segmentation => self.segmented,
            Stage::Classification => self.classified,
            Stage::Finalize => false,
        }
    }

    /// First stage whose work is still outstanding
    pub fn first_incomplete(&self) -> Stage {
        Stage::iter()
            .find(|stage| !self.is_done(*stage))
            .unwrap_or(Stage::Finalize)
    }

    pub fn count(&self) -> usize {
        [self.structured, self.sectioned, self.segmented, self.classified]
            .iter()
            .filter(|f| **f)
            .count()
    }

    /// Column backing the flag for a stage
    pub(crate) fn column(stage: Stage) -> Option<&'static str> {
        match stage {
            Stage::StructuralParse => Some("structured"),
            Stage::SectionStore => Some("sectioned"),
            Stage::Segmentation => Some("segmented"),
            Stage::Classification => Some("classified"),
            Stage::Finalize => None,
        }
    }
}

/// Document record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content_hash: String,
    pub status: DocumentStatus,
    pub stage_flags: StageFlags,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub error_recoverable: bool,
    /// Transient source blob, removed once the document is finalized
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_path: Option<String>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub(crate) const COLUMNS: &'static str = "id, title, content_hash, status, structured, sectioned, segmented, classified, \
         error_message, error_recoverable, blob_path, size_bytes, created_at, updated_at";

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status_str: String = row.get(3)?;
        let size_bytes: i64 = row.get(11)?;
        let created_at_str: String = row.get(12)?;
        let updated_at_str: String = row.get(13)?;

        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            content_hash: row.get(2)?,
            status: DocumentStatus::from_str(&status_str),
            stage_flags: StageFlags {
                structured: row.get(4)?,
                sectioned: row.get(5)?,
                segmented: row.get(6)?,
                classified: row.get(7)?,
            },
            error_message: row.get(8)?,
            error_recoverable: row.get(9)?,
            blob_path: row.get(10)?,
            size_bytes: size_bytes.max(0) as u64,
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }
}

/// Section record. Never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub document_id: String,
    pub section_type: String,
    pub order: i64,
    pub content: String,
    pub word_count: i64,
    pub page_start: Option<i64>,
    pub page_end: Option<i64>,
}

impl Section {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            section_type: row.get(2)?,
            order: row.get(3)?,
            content: row.get(4)?,
            word_count: row.get(5)?,
            page_start: row.get(6)?,
            page_end: row.get(7)?,
        })
    }
}

/// Section to be inserted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSection {
    pub section_type: String,
    pub content: String,
    pub page_start: Option<i64>,
    pub page_end: Option<i64>,
}

/// Classification state of a sentence.
/// Only moves forward: unknown → pending → success | error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Unknown,
    Pending,
    Success,
    Error,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Unknown => "unknown",
            Classification::Pending => "pending",
            Classification::Success => "success",
            Classification::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => Classification::Pending,
            "success" => Classification::Success,
            "error" => Classification::Error,
            _ => Classification::Unknown,
        }
    }
}

/// Sentence record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sentence {
    pub id: String,
    pub document_id: String,
    pub section_id: String,
    pub order: i64,
    pub content: String,
    pub classification: Classification,
    pub labels: BTreeMap<String, bool>,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl Sentence {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let classification_str: String = row.get(5)?;
        let labels_str: String = row.get(6)?;
        let retry_count: i64 = row.get(7)?;

        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            section_id: row.get(2)?,
            order: row.get(3)?,
            content: row.get(4)?,
            classification: Classification::from_str(&classification_str),
            labels: serde_json::from_str(&labels_str).unwrap_or_default(),
            retry_count: retry_count.max(0) as u32,
            explanation: row.get(8)?,
        })
    }
}

/// Sentence to be inserted
#[derive(Debug, Clone)]
pub struct NewSentence {
    pub order: i64,
    pub content: String,
}

/// Final state the classifier runner assigns to one sentence
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationOutcome {
    pub classification: Classification,
    pub labels: BTreeMap<String, bool>,
    /// Retries used beyond the first attempt
    pub retry_count: u32,
    pub explanation: Option<String>,
}

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "processing" => TaskStatus::Processing,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Pending,
        }
    }
}

/// Persisted unit of work: one stage of one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub document_id: String,
    pub stage: Stage,
    pub status: TaskStatus,
    pub priority: i64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_seconds: u64,
    pub created_at: DateTime<Utc>,
    /// Earliest time the task may be claimed
    pub available_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Stage output handed to the next stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
}

impl Task {
    pub(crate) const COLUMNS: &'static str = "id, document_id, stage, status, priority, retry_count, max_retries, timeout_seconds, \
         created_at, available_at, started_at, finished_at, error_message, result, parent_task_id";

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let stage_str: String = row.get(2)?;
        let status_str: String = row.get(3)?;
        let retry_count: i64 = row.get(5)?;
        let max_retries: i64 = row.get(6)?;
        let timeout_seconds: i64 = row.get(7)?;
        let created_at_str: String = row.get(8)?;
        let available_at_str: String = row.get(9)?;
        let result_str: Option<String> = row.get(13)?;

        let stage = stage_str.parse::<Stage>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            stage,
            status: TaskStatus::from_str(&status_str),
            priority: row.get(4)?,
            retry_count: retry_count.max(0) as u32,
            max_retries: max_retries.max(0) as u32,
            timeout_seconds: timeout_seconds.max(0) as u64,
            created_at: parse_timestamp(&created_at_str),
            available_at: parse_timestamp(&available_at_str),
            started_at: parse_optional_timestamp(row.get(10)?),
            finished_at: parse_optional_timestamp(row.get(11)?),
            error_message: row.get(12)?,
            result: result_str.and_then(|s| serde_json::from_str(&s).ok()),
            parent_task_id: row.get(14)?,
        })
    }
}

/// Entry in a task's progress log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: i64,
    pub task_id: String,
    pub event_type: String,
    #[serde(rename = "step_number")]
    pub step: u32,
    pub total_steps: u32,
    pub percentage: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl TaskEvent {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let step: i64 = row.get(3)?;
        let total_steps: i64 = row.get(4)?;
        let details_str: Option<String> = row.get(7)?;
        let created_at_str: String = row.get(8)?;

        Ok(Self {
            id: row.get(0)?,
            task_id: row.get(1)?,
            event_type: row.get(2)?,
            step: step.max(0) as u32,
            total_steps: total_steps.max(0) as u32,
            percentage: row.get(5)?,
            message: row.get(6)?,
            details: details_str.and_then(|s| serde_json::from_str(&s).ok()),
            created_at: parse_timestamp(&created_at_str),
        })
    }
}

/// Entry in a task's error log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub id: i64,
    pub task_id: String,
    pub error_type: String,
    pub severity: String,
    pub recoverable: bool,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl TaskError {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let created_at_str: String = row.get(6)?;

        Ok(Self {
            id: row.get(0)?,
            task_id: row.get(1)?,
            error_type: row.get(2)?,
            severity: row.get(3)?,
            recoverable: row.get(4)?,
            message: row.get(5)?,
            created_at: parse_timestamp(&created_at_str),
        })
    }
}

/// Body of `GET /api/documents/{id}/status`, also what the status monitor decodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStatusReport {
    pub document_id: String,
    pub status: DocumentStatus,
    pub stage_flags: StageFlags,
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub recoverable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert_eq!(Stage::first(), Stage::StructuralParse);
        assert_eq!(Stage::StructuralParse.next(), Some(Stage::SectionStore));
        assert_eq!(Stage::Classification.next(), Some(Stage::Finalize));
        assert_eq!(Stage::Finalize.next(), None);
        assert_eq!(Stage::Finalize.step_number(), Stage::COUNT);
    }

    #[test]
    fn test_stage_names_round_trip_through_strum() {
        assert_eq!(Stage::SectionStore.to_string(), "section_store");
        assert_eq!("finalize".parse::<Stage>().unwrap(), Stage::Finalize);
    }

    #[test]
    fn test_first_incomplete_stage() {
        let mut flags = StageFlags::default();
        assert_eq!(flags.first_incomplete(), Stage::StructuralParse);
        flags.structured = true;
        flags.sectioned = true;
        assert_eq!(flags.first_incomplete(), Stage::Segmentation);
        flags.segmented = true;
        flags.classified = true;
        assert!(flags.all_set());
        assert_eq!(flags.first_incomplete(), Stage::Finalize);
    }

    #[test]
    fn test_unknown_status_strings_fall_back() {
        assert_eq!(DocumentStatus::from_str("bogus"), DocumentStatus::Error);
        assert_eq!(Classification::from_str("bogus"), Classification::Unknown);
        assert!(DocumentStatus::Completed.is_terminal());
        assert!(!DocumentStatus::Processing.is_terminal());
    }
}
