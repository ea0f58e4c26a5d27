//! Document upload.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::db::{Admission, Document, DocumentStatus, NewTask, Stage, StageFlags};
use crate::error::{ProcessingError, ServiceError, ServiceResult, format_error_chain_ref};
use crate::ingestion::compute_content_hash;
use crate::service::PipelineService;

/// Result of an upload: the document to poll, and whether it already existed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub document_id: String,
    pub duplicate: bool,
}

impl PipelineService {
    /// Ingest a document and enqueue its first stage.
    ///
    /// Content already known by hash returns the existing document id with
    /// `duplicate = true` and enqueues nothing. The document row and its first
    /// task are stored together, so a document never sits without a task.
    pub async fn upload_document(
        &self,
        content: &[u8],
        title: &str,
        priority: Option<i64>,
    ) -> ServiceResult<UploadOutcome> {
        let max_size = self.config.limits.max_document_size_bytes;
        if content.len() as u64 > max_size {
            return Err(ServiceError::Processing(ProcessingError::FileTooLarge {
                size: content.len() as u64,
                max: max_size,
            }));
        }
        if content.is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "Document is empty".to_string(),
            });
        }

        let content_hash = compute_content_hash(content);
        if let Some(existing_id) = self.db.get_document_by_hash(&content_hash)? {
            return Ok(self.duplicate_upload(existing_id, title));
        }

        // Blob first: a stored document always has its source
        let doc_id = uuid::Uuid::new_v4().to_string();
        let blob_path = self.blobs.write(&doc_id, content).await?;

        let now = chrono::Utc::now();
        let document = Document {
            id: doc_id.clone(),
            title: title.to_string(),
            content_hash,
            status: DocumentStatus::Processing,
            stage_flags: StageFlags::default(),
            error_message: None,
            error_recoverable: false,
            blob_path: Some(blob_path.to_string_lossy().to_string()),
            size_bytes: content.len() as u64,
            created_at: now,
            updated_at: now,
        };

        let pipeline = &self.config.pipeline;
        let first = NewTask {
            document_id: &doc_id,
            stage: Stage::first(),
            priority: priority.unwrap_or(pipeline.default_priority),
            parent_task_id: None,
            max_retries: pipeline.max_retries,
            timeout_seconds: pipeline.task_timeout_secs,
        };

        let task = match self.db.admit_document(&document, first) {
            Ok(Admission::Created(task)) => task,
            Ok(Admission::Duplicate(existing_id)) => {
                self.discard_blob(&doc_id, &blob_path).await;
                return Ok(self.duplicate_upload(existing_id, title));
            }
            Err(e) => {
                warn!(doc_id = %doc_id, error = %format_error_chain_ref(&e), "Failed to store uploaded document");
                self.discard_blob(&doc_id, &blob_path).await;
                return Err(e);
            }
        };

        metrics::counter!("docpipe_uploads_total", "duplicate" => "false").increment(1);
        info!(
            doc_id = %doc_id,
            task_id = %task.id,
            title = %title,
            bytes = content.len(),
            "Document uploaded and queued for processing"
        );

        Ok(UploadOutcome {
            document_id: doc_id,
            duplicate: false,
        })
    }

    fn duplicate_upload(&self, existing_id: String, title: &str) -> UploadOutcome {
        info!(doc_id = %existing_id, title = %title, "Duplicate upload, returning existing document");
        metrics::counter!("docpipe_uploads_total", "duplicate" => "true").increment(1);
        UploadOutcome {
            document_id: existing_id,
            duplicate: true,
        }
    }

    async fn discard_blob(&self, doc_id: &str, path: &Path) {
        if let Err(e) = self.blobs.remove(path).await {
            warn!(doc_id = %doc_id, error = %e, "Failed to remove orphaned upload blob");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::CompletenessPolicy;
    use crate::db::{DocumentStatus, Stage};
    use crate::error::{ProcessingError, ServiceError};
    use crate::service::test_support::{
        KeywordClassifier, TextParser, service_from_config, service_with, ten_sentences,
        test_config,
    };

    #[tokio::test]
    async fn test_duplicate_upload_returns_existing_id() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(
            &dir,
            CompletenessPolicy::Tolerant,
            Arc::new(TextParser::default()),
            Arc::new(KeywordClassifier::default()),
        );

        let first = service
            .upload_document(&ten_sentences(), "paper", None)
            .await
            .unwrap();
        assert!(!first.duplicate);

        let second = service
            .upload_document(&ten_sentences(), "same paper, new title", None)
            .await
            .unwrap();
        assert!(second.duplicate);
        assert_eq!(second.document_id, first.document_id);

        let tasks = service.db.list_tasks_for_document(&first.document_id).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].stage, Stage::StructuralParse);

        let doc = service.db.get_document(&first.document_id).unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);
        assert_eq!(doc.title, "paper");
        assert!(service.blobs.path_for(&doc.id).exists());
    }

    #[tokio::test]
    async fn test_failed_blob_write_leaves_no_document_behind() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(
            &dir,
            CompletenessPolicy::Tolerant,
            Arc::new(TextParser::default()),
            Arc::new(KeywordClassifier::default()),
        );
        // A plain file where the blob directory should be
        std::fs::write(service.blobs.dir(), b"not a directory").unwrap();

        let err = service
            .upload_document(&ten_sentences(), "paper", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Processing(ProcessingError::Io(_))));
        let hash = crate::ingestion::compute_content_hash(&ten_sentences());
        assert_eq!(service.db.get_document_by_hash(&hash).unwrap(), None);

        // Once storage is back the same bytes upload as a new document
        std::fs::remove_file(service.blobs.dir()).unwrap();
        let outcome = service
            .upload_document(&ten_sentences(), "paper", None)
            .await
            .unwrap();
        assert!(!outcome.duplicate);
        let tasks = service.db.list_tasks_for_document(&outcome.document_id).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(
            service.db.get_document(&outcome.document_id).unwrap().unwrap().status,
            DocumentStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_failed_admission_removes_blob() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(
            &dir,
            CompletenessPolicy::Tolerant,
            Arc::new(TextParser::default()),
            Arc::new(KeywordClassifier::default()),
        );
        service
            .db
            .conn()
            .execute_batch("ALTER TABLE tasks RENAME TO tasks_unavailable")
            .unwrap();

        assert!(
            service
                .upload_document(&ten_sentences(), "paper", None)
                .await
                .is_err()
        );
        let hash = crate::ingestion::compute_content_hash(&ten_sentences());
        assert_eq!(service.db.get_document_by_hash(&hash).unwrap(), None);
        let leftover = std::fs::read_dir(service.blobs.dir()).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir, CompletenessPolicy::Tolerant);
        config.limits.max_document_size_bytes = 16;
        let service = service_from_config(
            config,
            Arc::new(TextParser::default()),
            Arc::new(KeywordClassifier::default()),
        );
        let too_big = vec![b'a'; 17];

        let err = service.upload_document(&too_big, "big", None).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Processing(ProcessingError::FileTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_priority_is_stored_on_first_task() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(
            &dir,
            CompletenessPolicy::Tolerant,
            Arc::new(TextParser::default()),
            Arc::new(KeywordClassifier::default()),
        );

        let outcome = service
            .upload_document(b"Urgent sentence.", "urgent", Some(9))
            .await
            .unwrap();
        let tasks = service.db.list_tasks_for_document(&outcome.document_id).unwrap();
        assert_eq!(tasks[0].priority, 9);
    }
}
