//! Status, retry, delete and audit-log lookups.

use tracing::{info, warn};

use crate::db::{
    Classification, Document, DocumentStatus, DocumentStatusReport, Stage, Task, TaskError,
    TaskEvent,
};
use crate::error::{ServiceError, ServiceResult};
use crate::progress::overall_percentage;
use crate::service::PipelineService;

impl PipelineService {
    /// Current status of a document as served to pollers
    pub fn document_status(&self, document_id: &str) -> ServiceResult<DocumentStatusReport> {
        let document = self.load_document(document_id)?;
        let percentage = self.document_percentage(&document)?;

        Ok(DocumentStatusReport {
            document_id: document.id,
            status: document.status,
            stage_flags: document.stage_flags,
            percentage,
            error_message: document.error_message,
            recoverable: document.error_recoverable,
        })
    }

    /// Overall progress derived from stage flags and, during classification,
    /// the share of sentences with a final outcome
    pub(crate) fn document_percentage(&self, document: &Document) -> ServiceResult<f64> {
        if document.status == DocumentStatus::Completed {
            return Ok(100.0);
        }

        let stage = document.stage_flags.first_incomplete();
        let fraction = if stage == Stage::Classification {
            let total = self.db.count_sentences(&document.id)?;
            if total == 0 {
                0.0
            } else {
                let success = self
                    .db
                    .count_sentences_by_classification(&document.id, Classification::Success)?;
                let failed = self
                    .db
                    .count_sentences_by_classification(&document.id, Classification::Error)?;
                (success + failed) as f64 / total as f64
            }
        } else {
            0.0
        };

        Ok(overall_percentage(stage, fraction))
    }

    /// Resume a failed document at its first incomplete stage.
    ///
    /// Stages whose flag is already set are not repeated. The new task links
    /// back to the task that failed.
    pub fn retry_document(&self, document_id: &str) -> ServiceResult<Task> {
        let document = self.load_document(document_id)?;

        if document.status != DocumentStatus::Error {
            return Err(ServiceError::InvalidRequest {
                message: format!(
                    "Document {} is {}, only failed documents can be retried",
                    document_id,
                    document.status.as_str()
                ),
            });
        }
        if self.db.has_active_task(document_id)? {
            return Err(ServiceError::InvalidRequest {
                message: format!("Document {} already has a task in progress", document_id),
            });
        }

        let stage = document.stage_flags.first_incomplete();
        let parent = self.db.latest_failed_task(document_id)?;
        let priority = parent
            .as_ref()
            .map(|t| t.priority)
            .unwrap_or(self.config.pipeline.default_priority);

        let pipeline = &self.config.pipeline;
        let task = self.db.enqueue_task(
            document_id,
            stage,
            priority,
            parent.as_ref().map(|t| t.id.as_str()),
            pipeline.max_retries,
            pipeline.task_timeout_secs,
        )?;
        self.db
            .update_document_status(document_id, DocumentStatus::Processing, None, false)?;

        info!(doc_id = %document_id, task_id = %task.id, stage = %stage, "Document retry queued");
        metrics::counter!("docpipe_document_retries_total").increment(1);

        self.broadcast_document_progress(
            document_id,
            DocumentStatus::Processing,
            Some(stage),
            overall_percentage(stage, 0.0),
            &format!("Retrying from {}", stage),
            None,
        );

        Ok(task)
    }

    /// Delete a document and everything hanging off it.
    ///
    /// In-flight processing is cancelled first; sections, sentences, tasks,
    /// events and errors go with the document row.
    pub async fn delete_document(&self, document_id: &str) -> ServiceResult<()> {
        let document = self.load_document(document_id)?;

        if self.cancel_document_processing(document_id) {
            info!(doc_id = %document_id, "Cancelled in-progress processing for deleted document");
        }

        if let Some(blob_path) = document.blob_path.as_deref()
            && let Err(e) = self.blobs.remove(std::path::Path::new(blob_path)).await
        {
            warn!(doc_id = %document_id, error = %e, "Failed to remove document blob");
        }

        self.db.delete_document(document_id)?;
        self.progress.close(document_id);

        info!(doc_id = %document_id, "Document deleted");
        Ok(())
    }

    /// Tasks of a document, oldest first
    pub fn list_tasks(&self, document_id: &str) -> ServiceResult<Vec<Task>> {
        self.load_document(document_id)?;
        self.db.list_tasks_for_document(document_id)
    }

    pub fn task_events(&self, task_id: &str) -> ServiceResult<Vec<TaskEvent>> {
        self.ensure_task(task_id)?;
        self.db.get_task_events(task_id)
    }

    pub fn task_errors(&self, task_id: &str) -> ServiceResult<Vec<TaskError>> {
        self.ensure_task(task_id)?;
        self.db.get_task_errors(task_id)
    }

    fn ensure_task(&self, task_id: &str) -> ServiceResult<Task> {
        self.db
            .get_task(task_id)?
            .ok_or_else(|| ServiceError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }
}
