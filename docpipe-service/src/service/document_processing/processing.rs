//! Stage execution.
//!
//! Every stage runs as one claimed task. Success persists the stage's
//! artifacts, sets its flag and enqueues the next stage with the finished task
//! as parent. Failure is recorded against the task and either re-enqueued with
//! backoff or propagated to the document.

use serde_json::json;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classify::ItemEvent;
use crate::collaborators::ParsedSection;
use crate::config::CompletenessPolicy;
use crate::db::{
    Classification, Document, DocumentStatus, FailOutcome, NewSection, NewSentence, Stage, Task,
    TaskStatus,
};
use crate::error::{
    DatabaseError, ErrorSeverity, ProcessingError, ServiceError, ServiceResult,
    format_error_chain_ref,
};
use crate::ingestion::split_sentences;
use crate::progress::overall_percentage;
use crate::service::PipelineService;

/// What a successful stage hands back
struct StageOutput {
    /// Stored on the task, read by later stages
    result: Option<serde_json::Value>,
    /// Summary attached to the completion event
    details: serde_json::Value,
    message: String,
}

impl PipelineService {
    /// Drive one document through its remaining stages until it is terminal.
    ///
    /// This is the synchronous single-document driver: it claims only this
    /// document's tasks and waits out retry delays inline. The server's worker
    /// pool uses `run_task` on tasks claimed across all documents instead, so
    /// both paths share the same stage execution.
    ///
    /// Returns the terminal status. A document with no pending or running task
    /// returns its current status instead of waiting.
    pub async fn process_document(&self, document_id: &str) -> ServiceResult<DocumentStatus> {
        let idle = self.config.pipeline.idle_poll();

        loop {
            let document = self.load_document(document_id)?;
            if document.status.is_terminal() {
                return Ok(document.status);
            }

            if let Some(task) = self.db.claim_task_for_document(document_id)? {
                self.run_task(task).await;
                continue;
            }

            match self.db.next_pending_available_at(document_id)? {
                Some(available_at) => {
                    let wait = (available_at - chrono::Utc::now())
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    debug!(doc_id = %document_id, wait_ms = wait.as_millis() as u64, "Waiting for retry delay");
                    tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                }
                // Task is running on a worker
                None if self.db.has_active_task(document_id)? => tokio::time::sleep(idle).await,
                None => return Ok(document.status),
            }
        }
    }

    /// Execute one claimed task and record its outcome
    pub(crate) async fn run_task(&self, task: Task) {
        let doc_id = task.document_id.clone();
        let token = self.processing_token(&doc_id);
        let stage = task.stage;

        metrics::counter!("docpipe_tasks_claimed_total", "stage" => stage.to_string()).increment(1);
        info!(
            doc_id = %doc_id,
            task_id = %task.id,
            stage = %stage,
            attempt = task.retry_count + 1,
            "Running stage"
        );

        self.report_progress(
            &task,
            "stage_started",
            overall_percentage(stage, 0.0),
            &format!("Starting {}", stage),
            None,
        );

        let started = Instant::now();
        let result = if stage.is_itemized() {
            // Each classifier call has its own timeout and retry budget, and the
            // stale sweep watches per-item progress
            self.execute_stage(&task, &token).await
        } else {
            let timeout = Duration::from_secs(task.timeout_seconds);
            match tokio::time::timeout(timeout, self.execute_stage(&task, &token)).await {
                Ok(result) => result,
                Err(_) => Err(ProcessingError::Transient {
                    message: format!("{} timed out after {}s", stage, task.timeout_seconds),
                }
                .into()),
            }
        };
        metrics::histogram!("docpipe_stage_duration_seconds", "stage" => stage.to_string())
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(output) => self.complete_stage(&task, output),
            Err(e) => self.handle_stage_failure(&task, e),
        }
    }

    async fn execute_stage(
        &self,
        task: &Task,
        token: &CancellationToken,
    ) -> ServiceResult<StageOutput> {
        self.check_cancellation(&task.document_id, token)?;

        match task.stage {
            Stage::StructuralParse => self.run_structural_parse(task).await,
            Stage::SectionStore => self.run_section_store(task),
            Stage::Segmentation => self.run_segmentation(task),
            Stage::Classification => self.run_classification(task, token).await,
            Stage::Finalize => self.run_finalize(task).await,
        }
    }

    pub(crate) fn load_document(&self, document_id: &str) -> ServiceResult<Document> {
        self.db
            .get_document(document_id)?
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            })
    }

    async fn run_structural_parse(&self, task: &Task) -> ServiceResult<StageOutput> {
        let document = self.load_document(&task.document_id)?;
        let blob_path = document
            .blob_path
            .as_deref()
            .ok_or_else(|| ProcessingError::Validation {
                message: "source document is no longer stored".to_string(),
            })?;

        let content = self.blobs.read(Path::new(blob_path)).await?;
        let sections = self
            .parser
            .parse(content)
            .await
            .map_err(ProcessingError::Parser)?;
        let count = sections.len();

        let sections = serde_json::to_value(&sections).map_err(DatabaseError::Serialization)?;
        self.db.set_stage_flag(&document.id, Stage::StructuralParse)?;

        Ok(StageOutput {
            result: Some(json!({ "sections": sections })),
            details: json!({ "sections": count }),
            message: format!("Parsed {} sections", count),
        })
    }

    fn run_section_store(&self, task: &Task) -> ServiceResult<StageOutput> {
        let parse_task = self
            .db
            .latest_task_for_stage(&task.document_id, Stage::StructuralParse)?
            .filter(|t| t.status == TaskStatus::Completed)
            .ok_or_else(|| ProcessingError::Validation {
                message: "no completed structural parse to store sections from".to_string(),
            })?;

        let sections: Vec<ParsedSection> = parse_task
            .result
            .and_then(|mut result| result.get_mut("sections").map(serde_json::Value::take))
            .map(serde_json::from_value)
            .transpose()
            .map_err(DatabaseError::Serialization)?
            .ok_or_else(|| ProcessingError::Validation {
                message: "structural parse result has no sections".to_string(),
            })?;

        let new_sections: Vec<NewSection> = sections.into_iter().map(NewSection::from).collect();
        let written = self.db.insert_sections(&task.document_id, &new_sections)?;
        self.db.set_stage_flag(&task.document_id, Stage::SectionStore)?;

        Ok(StageOutput {
            result: Some(json!({ "sections": written })),
            details: json!({ "sections": new_sections.len(), "written": written }),
            message: format!("Stored {} sections", new_sections.len()),
        })
    }

    fn run_segmentation(&self, task: &Task) -> ServiceResult<StageOutput> {
        let sections = self.db.get_sections(&task.document_id)?;

        let mut total = 0;
        for section in &sections {
            let sentences: Vec<NewSentence> = split_sentences(&section.content)
                .into_iter()
                .enumerate()
                .map(|(order, content)| NewSentence {
                    order: order as i64,
                    content,
                })
                .collect();
            total += sentences.len();
            self.db
                .insert_sentences(&task.document_id, &section.id, &sentences)?;
        }

        self.db.set_stage_flag(&task.document_id, Stage::Segmentation)?;

        Ok(StageOutput {
            result: Some(json!({ "sentences": total })),
            details: json!({ "sections": sections.len(), "sentences": total }),
            message: format!("Segmented {} sentences", total),
        })
    }

    async fn run_classification(
        &self,
        task: &Task,
        token: &CancellationToken,
    ) -> ServiceResult<StageOutput> {
        let sections = self.db.get_sections(&task.document_id)?;
        let mut work = Vec::with_capacity(sections.len());
        for section in &sections {
            work.push(self.db.get_sentences_to_classify(&section.id)?);
        }

        let total: usize = work.iter().map(Vec::len).sum();
        let mut done_before = 0;
        let (mut succeeded, mut failed) = (0, 0);

        for sentences in work.iter().filter(|s| !s.is_empty()) {
            let offset = done_before;
            let summary = self
                .runner
                .classify_section(sentences, token, |event| match event {
                    ItemEvent::Started { sentence } => {
                        if let Err(e) = self.db.mark_sentence_pending(&sentence.id) {
                            warn!(sentence_id = %sentence.id, error = %e, "Failed to mark sentence pending");
                        }
                    }
                    ItemEvent::Finished {
                        processed,
                        sentence_id,
                        outcome,
                        ..
                    } => {
                        if let Err(e) = self.db.record_sentence_outcome(sentence_id, outcome) {
                            warn!(sentence_id = %sentence_id, error = %e, "Failed to record classification");
                        }
                        let done = offset + processed;
                        self.report_progress(
                            task,
                            "item_processed",
                            overall_percentage(Stage::Classification, done as f64 / total as f64),
                            &format!("Classified {}/{} sentences", done, total),
                            Some(json!({
                                "sentence_id": sentence_id,
                                "classification": outcome.classification.as_str(),
                                "retry_count": outcome.retry_count,
                            })),
                        );
                    }
                })
                .await?;

            done_before += summary.total;
            succeeded += summary.succeeded;
            failed += summary.failed;
        }

        self.db.set_stage_flag(&task.document_id, Stage::Classification)?;

        let details = json!({ "sentences": total, "succeeded": succeeded, "failed": failed });
        Ok(StageOutput {
            result: Some(details.clone()),
            details,
            message: format!(
                "Classified {} sentences ({} failed)",
                total, failed
            ),
        })
    }

    async fn run_finalize(&self, task: &Task) -> ServiceResult<StageOutput> {
        let document = self.load_document(&task.document_id)?;
        self.check_completeness(&document)?;

        if let Some(blob_path) = document.blob_path.as_deref() {
            self.blobs.remove(Path::new(blob_path)).await?;
            self.db.clear_blob_path(&document.id)?;
        }

        Ok(StageOutput {
            result: None,
            details: json!({ "blob_removed": document.blob_path.is_some() }),
            message: "Document complete".to_string(),
        })
    }

    /// Completeness rules applied before a document may be marked completed
    fn check_completeness(&self, document: &Document) -> ServiceResult<()> {
        if !document.stage_flags.all_set() {
            return Err(ProcessingError::Validation {
                message: format!(
                    "stages incomplete, next outstanding is {}",
                    document.stage_flags.first_incomplete()
                ),
            }
            .into());
        }

        let pending = self
            .db
            .count_sentences_by_classification(&document.id, Classification::Pending)?;
        if pending > 0 {
            return Err(ProcessingError::Validation {
                message: format!("{} sentences are still pending classification", pending),
            }
            .into());
        }

        if self.config.pipeline.completeness_policy == CompletenessPolicy::Strict {
            let total = self.db.count_sentences(&document.id)?;
            let success = self
                .db
                .count_sentences_by_classification(&document.id, Classification::Success)?;
            if success < total {
                return Err(ProcessingError::Validation {
                    message: format!(
                        "{} of {} sentences were not classified successfully",
                        total - success,
                        total
                    ),
                }
                .into());
            }
        }

        Ok(())
    }

    fn complete_stage(&self, task: &Task, output: StageOutput) {
        let doc_id = &task.document_id;

        match self.db.complete_task(&task.id, output.result.as_ref()) {
            Ok(true) => {}
            Ok(false) => {
                // Swept as stale while running; the requeued copy owns the stage now
                warn!(doc_id = %doc_id, task_id = %task.id, "Task no longer processing, dropping result");
                return;
            }
            Err(e) => {
                error!(doc_id = %doc_id, task_id = %task.id, error = %e, "Failed to complete task");
                return;
            }
        }
        metrics::counter!("docpipe_tasks_completed_total", "stage" => task.stage.to_string())
            .increment(1);

        let percentage = overall_percentage(task.stage, 1.0);
        self.record_event(
            task,
            "stage_completed",
            percentage,
            &output.message,
            Some(output.details),
        );

        let Some(next) = task.stage.next() else {
            if let Err(e) =
                self.db
                    .update_document_status(doc_id, DocumentStatus::Completed, None, false)
            {
                error!(doc_id = %doc_id, error = %e, "Failed to mark document completed");
                return;
            }
            info!(doc_id = %doc_id, "Document processing complete");
            metrics::counter!("docpipe_documents_completed_total").increment(1);
            self.broadcast_document_progress(
                doc_id,
                DocumentStatus::Completed,
                Some(task.stage),
                100.0,
                &output.message,
                None,
            );
            self.unregister_processing_token(doc_id);
            return;
        };

        let pipeline = &self.config.pipeline;
        match self.db.enqueue_task(
            doc_id,
            next,
            task.priority,
            Some(&task.id),
            pipeline.max_retries,
            pipeline.task_timeout_secs,
        ) {
            Ok(next_task) => {
                debug!(
                    doc_id = %doc_id,
                    task_id = %next_task.id,
                    parent_task_id = %task.id,
                    stage = %next,
                    "Next stage enqueued"
                );
                self.broadcast_document_progress(
                    doc_id,
                    DocumentStatus::Processing,
                    Some(task.stage),
                    percentage,
                    &output.message,
                    None,
                );
            }
            Err(e) => {
                let message = format!("Failed to enqueue {}: {}", next, format_error_chain_ref(&e));
                self.fail_document(doc_id, &message, true);
            }
        }
    }

    fn handle_stage_failure(&self, task: &Task, err: ServiceError) {
        let doc_id = &task.document_id;

        if let ServiceError::Processing(ProcessingError::Cancelled { .. }) = err {
            info!(doc_id = %doc_id, task_id = %task.id, stage = %task.stage, "Stage cancelled");
            return;
        }

        let message = format_error_chain_ref(&err);
        let (kind, severity, retryable) = match &err {
            ServiceError::Processing(e) => (e.kind(), e.severity(), e.is_retryable()),
            ServiceError::Database(_) => ("database_error", ErrorSeverity::Error, true),
            _ => ("internal_error", ErrorSeverity::Error, false),
        };

        if let Err(e) = self
            .db
            .record_task_error(&task.id, kind, severity, retryable, &message)
        {
            warn!(task_id = %task.id, error = %e, "Failed to record task error");
        }

        let delay = self.config.pipeline.retry_policy().delay(task.retry_count);
        match self.db.fail_task(&task.id, &message, retryable, delay) {
            Ok(FailOutcome::Requeued {
                retry_count,
                available_at,
            }) => {
                metrics::counter!("docpipe_tasks_retried_total", "stage" => task.stage.to_string())
                    .increment(1);
                warn!(
                    doc_id = %doc_id,
                    task_id = %task.id,
                    stage = %task.stage,
                    retry_count = retry_count,
                    max_retries = task.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Stage failed, retry scheduled"
                );
                self.report_progress(
                    task,
                    "stage_retry_scheduled",
                    overall_percentage(task.stage, 0.0),
                    &format!(
                        "{} failed, retry {}/{} scheduled",
                        task.stage, retry_count, task.max_retries
                    ),
                    Some(json!({ "error": message, "available_at": available_at })),
                );
            }
            Ok(FailOutcome::Failed) => {
                metrics::counter!("docpipe_tasks_failed_total", "stage" => task.stage.to_string())
                    .increment(1);

                let final_message = if retryable {
                    let exhausted = ProcessingError::ExhaustedRetries {
                        attempts: task.retry_count + 1,
                        message,
                    };
                    let rendered = exhausted.to_string();
                    if let Err(e) = self.db.record_task_error(
                        &task.id,
                        exhausted.kind(),
                        exhausted.severity(),
                        false,
                        &rendered,
                    ) {
                        warn!(task_id = %task.id, error = %e, "Failed to record task error");
                    }
                    rendered
                } else {
                    message
                };

                self.record_event(
                    task,
                    "stage_failed",
                    overall_percentage(task.stage, 0.0),
                    &final_message,
                    None,
                );
                self.fail_document(doc_id, &final_message, retryable);
            }
            Ok(FailOutcome::NotProcessing) => {
                warn!(
                    doc_id = %doc_id,
                    task_id = %task.id,
                    stage = %task.stage,
                    error = %message,
                    "Task was no longer processing, dropping its failure"
                );
            }
            Err(e) => {
                error!(
                    doc_id = %doc_id,
                    task_id = %task.id,
                    error = %e,
                    "Failed to record stage failure"
                );
            }
        }
    }

    /// Move a document to the error state and notify subscribers.
    ///
    /// `recoverable` tells the user whether an explicit retry may succeed.
    pub(crate) fn fail_document(&self, document_id: &str, message: &str, recoverable: bool) {
        if let Err(e) = self.db.update_document_status(
            document_id,
            DocumentStatus::Error,
            Some(message),
            recoverable,
        ) {
            warn!(doc_id = %document_id, error = %e, "Failed to mark document as failed");
        }

        error!(
            doc_id = %document_id,
            error = %message,
            recoverable = recoverable,
            "Document processing failed"
        );
        metrics::counter!("docpipe_documents_failed_total").increment(1);

        let percentage = self
            .load_document(document_id)
            .and_then(|doc| self.document_percentage(&doc))
            .unwrap_or(0.0);
        self.broadcast_document_progress(
            document_id,
            DocumentStatus::Error,
            None,
            percentage,
            "Document processing failed",
            Some(message),
        );
        self.unregister_processing_token(document_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use tokio::sync::broadcast::error::RecvError;

    use crate::config::CompletenessPolicy;
    use crate::db::{Classification, DocumentStatus, Stage, TaskStatus};
    use crate::service::PipelineService;
    use crate::service::test_support::{
        KeywordClassifier, TextParser, service_from_config, service_with, ten_sentences,
        test_config,
    };

    fn three_broken() -> Arc<KeywordClassifier> {
        Arc::new(KeywordClassifier {
            broken: vec![
                "sentence 2.".into(),
                "sentence 5.".into(),
                "sentence 8.".into(),
            ],
            ..Default::default()
        })
    }

    async fn upload(service: &PipelineService) -> String {
        service
            .upload_document(&ten_sentences(), "paper", None)
            .await
            .unwrap()
            .document_id
    }

    #[tokio::test]
    async fn test_document_completes_with_all_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(
            &dir,
            CompletenessPolicy::Tolerant,
            Arc::new(TextParser::default()),
            Arc::new(KeywordClassifier::default()),
        );
        let doc_id = upload(&service).await;

        let status = service.process_document(&doc_id).await.unwrap();
        assert_eq!(status, DocumentStatus::Completed);

        let doc = service.db.get_document(&doc_id).unwrap().unwrap();
        assert!(doc.stage_flags.all_set());
        assert!(doc.blob_path.is_none());
        assert!(!service.blobs.path_for(&doc_id).exists());

        let sentences = service.db.get_sentences(&doc_id).unwrap();
        assert_eq!(sentences.len(), 10);
        assert!(
            sentences
                .iter()
                .all(|s| s.classification == Classification::Success)
        );
        assert_eq!(sentences[3].content, "This is sentence 3.");

        let tasks = service.db.list_tasks_for_document(&doc_id).unwrap();
        let stages: Vec<Stage> = tasks.iter().map(|t| t.stage).collect();
        assert_eq!(
            stages,
            vec![
                Stage::StructuralParse,
                Stage::SectionStore,
                Stage::Segmentation,
                Stage::Classification,
                Stage::Finalize
            ]
        );
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
        for pair in tasks.windows(2) {
            assert_eq!(pair[1].parent_task_id.as_deref(), Some(pair[0].id.as_str()));
        }

        let classify_events = service.db.get_task_events(&tasks[3].id).unwrap();
        let items = classify_events
            .iter()
            .filter(|e| e.event_type == "item_processed")
            .count();
        assert_eq!(items, 10);
        assert_eq!(classify_events.last().unwrap().event_type, "stage_completed");
    }

    #[tokio::test]
    async fn test_three_failed_sentences_complete_under_tolerant_policy() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(
            &dir,
            CompletenessPolicy::Tolerant,
            Arc::new(TextParser::default()),
            three_broken(),
        );
        let doc_id = upload(&service).await;

        let status = service.process_document(&doc_id).await.unwrap();
        assert_eq!(status, DocumentStatus::Completed);

        let sentences = service.db.get_sentences(&doc_id).unwrap();
        let failed: Vec<_> = sentences
            .iter()
            .filter(|s| s.classification == Classification::Error)
            .collect();
        assert_eq!(failed.len(), 3);
        for sentence in &failed {
            assert_eq!(sentence.retry_count, 2);
            assert!(
                sentence
                    .explanation
                    .as_deref()
                    .unwrap()
                    .contains("retries exhausted")
            );
        }
        assert_eq!(
            service
                .db
                .count_sentences_by_classification(&doc_id, Classification::Success)
                .unwrap(),
            7
        );
        assert_eq!(
            service
                .db
                .count_sentences_by_classification(&doc_id, Classification::Pending)
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_three_failed_sentences_fail_validation_under_strict_policy() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(
            &dir,
            CompletenessPolicy::Strict,
            Arc::new(TextParser::default()),
            three_broken(),
        );
        let doc_id = upload(&service).await;

        let status = service.process_document(&doc_id).await.unwrap();
        assert_eq!(status, DocumentStatus::Error);

        let doc = service.db.get_document(&doc_id).unwrap().unwrap();
        assert!(doc.stage_flags.all_set());
        assert!(!doc.error_recoverable);
        assert!(
            doc.error_message
                .as_deref()
                .unwrap()
                .contains("3 of 10 sentences were not classified successfully")
        );

        let finalize = service
            .db
            .latest_task_for_stage(&doc_id, Stage::Finalize)
            .unwrap()
            .unwrap();
        assert_eq!(finalize.status, TaskStatus::Failed);
        assert_eq!(finalize.retry_count, 0);

        let errors = service.db.get_task_errors(&finalize.id).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, "validation");
        // The blob is kept so the document can be retried
        assert!(doc.blob_path.is_some());
    }

    #[tokio::test]
    async fn test_parser_failures_exhaust_retries() {
        let dir = tempfile::tempdir().unwrap();
        let parser = Arc::new(TextParser::failing(u32::MAX));
        let service = service_with(
            &dir,
            CompletenessPolicy::Tolerant,
            parser.clone(),
            Arc::new(KeywordClassifier::default()),
        );
        let doc_id = upload(&service).await;

        let status = service.process_document(&doc_id).await.unwrap();
        assert_eq!(status, DocumentStatus::Error);
        assert_eq!(parser.calls.load(Ordering::SeqCst), 3);

        let doc = service.db.get_document(&doc_id).unwrap().unwrap();
        assert!(doc.error_recoverable);
        assert!(!doc.stage_flags.structured);
        let message = doc.error_message.unwrap();
        assert!(message.starts_with("Retries exhausted after 3 attempts"));
        assert!(message.contains("parser overloaded"));

        let tasks = service.db.list_tasks_for_document(&doc_id).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Failed);
        assert_eq!(tasks[0].retry_count, 2);

        let errors = service.db.get_task_errors(&tasks[0].id).unwrap();
        let kinds: Vec<&str> = errors.iter().map(|e| e.error_type.as_str()).collect();
        assert_eq!(
            kinds,
            vec!["parse_error", "parse_error", "parse_error", "exhausted_retries"]
        );
    }

    #[tokio::test]
    async fn test_transient_parser_failure_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(
            &dir,
            CompletenessPolicy::Tolerant,
            Arc::new(TextParser::failing(1)),
            Arc::new(KeywordClassifier::default()),
        );
        let doc_id = upload(&service).await;

        assert_eq!(
            service.process_document(&doc_id).await.unwrap(),
            DocumentStatus::Completed
        );
        let parse = service
            .db
            .latest_task_for_stage(&doc_id, Stage::StructuralParse)
            .unwrap()
            .unwrap();
        assert_eq!(parse.retry_count, 1);
        assert_eq!(parse.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_slow_healthy_classification_outlives_stage_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir, CompletenessPolicy::Strict);
        config.pipeline.task_timeout_secs = 1;
        config.classifier.batch_size = 2;
        let classifier = Arc::new(KeywordClassifier {
            delay: std::time::Duration::from_millis(250),
            ..Default::default()
        });
        let service = service_from_config(config, Arc::new(TextParser::default()), classifier.clone());
        let doc_id = upload(&service).await;

        // Five batches of 250ms each run well past the 1s stage timeout
        assert_eq!(
            service.process_document(&doc_id).await.unwrap(),
            DocumentStatus::Completed
        );
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 10);

        let classify = service
            .db
            .latest_task_for_stage(&doc_id, Stage::Classification)
            .unwrap()
            .unwrap();
        assert_eq!(classify.retry_count, 0);
        assert_eq!(classify.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_progress_is_broadcast_until_completion() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(
            &dir,
            CompletenessPolicy::Tolerant,
            Arc::new(TextParser::default()),
            Arc::new(KeywordClassifier::default()),
        );
        let doc_id = upload(&service).await;
        let mut rx = service.progress.subscribe(&doc_id);

        service.process_document(&doc_id).await.unwrap();

        let mut updates = Vec::new();
        loop {
            match rx.recv().await {
                Ok(update) => updates.push(update),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        let last = updates.last().unwrap();
        assert_eq!(last.status, DocumentStatus::Completed);
        assert_eq!(last.percentage, 100.0);
        assert!(
            updates
                .windows(2)
                .all(|w| w[0].percentage <= w[1].percentage)
        );
    }
}
