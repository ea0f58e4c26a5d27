//! Background workers: the task pool and the stale-task sweeper.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db::FailOutcome;
use crate::service::PipelineService;

impl PipelineService {
    /// Start `pipeline.workers` loops that claim and run tasks.
    /// This should be called once on server startup
    pub fn start_workers(service: Arc<PipelineService>) -> Vec<JoinHandle<()>> {
        (0..service.config.pipeline.workers.max(1))
            .map(|worker| {
                let service = service.clone();
                tokio::spawn(async move { service.worker_loop(worker).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker: usize) {
        info!(worker = worker, "Pipeline worker started");
        let idle = self.config.pipeline.idle_poll();

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let pause = match self.db.claim_task() {
                Ok(Some(task)) => {
                    self.run_task(task).await;
                    continue;
                }
                Ok(None) => idle,
                Err(e) => {
                    error!(worker = worker, error = %e, "Failed to claim next task");
                    Duration::from_secs(5)
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!(worker = worker, "Pipeline worker stopped");
    }

    /// Periodically return tasks stuck in `processing` past their timeout to
    /// the queue. Runs once immediately to recover from a crash.
    pub fn start_stale_task_sweeper(service: Arc<PipelineService>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let interval = service.config.pipeline.stale_sweep_interval();
            info!(interval_secs = interval.as_secs(), "Stale task sweeper started");

            loop {
                service.sweep_stale_tasks(interval);

                tokio::select! {
                    _ = service.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        })
    }

    /// One sweep. A task counts as stale once its timeout plus `grace` has
    /// passed since it was claimed or last reported progress; the lost attempt
    /// counts as a retry.
    pub(crate) fn sweep_stale_tasks(&self, grace: Duration) -> usize {
        let grace = chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        let recovered = match self.db.requeue_stale_tasks(chrono::Utc::now() - grace) {
            Ok(recovered) => recovered,
            Err(e) => {
                error!(error = %e, "Failed to sweep stale tasks");
                return 0;
            }
        };

        for (task, outcome) in &recovered {
            metrics::counter!("docpipe_tasks_stale_total", "stage" => task.stage.to_string())
                .increment(1);
            match outcome {
                FailOutcome::Requeued { retry_count, .. } => {
                    warn!(
                        doc_id = %task.document_id,
                        task_id = %task.id,
                        stage = %task.stage,
                        retry_count = retry_count,
                        "Stale task returned to queue"
                    );
                }
                FailOutcome::Failed => {
                    let message = format!(
                        "{} made no progress within {}s and has no retries left",
                        task.stage, task.timeout_seconds
                    );
                    self.fail_document(&task.document_id, &message, true);
                }
                FailOutcome::NotProcessing => {}
            }
        }

        recovered.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::CompletenessPolicy;
    use crate::db::{DocumentStatus, Stage, TaskStatus};
    use crate::service::PipelineService;
    use crate::service::test_support::{
        KeywordClassifier, TextParser, service_from_config, service_with, test_config,
    };

    #[tokio::test]
    async fn test_worker_pool_processes_queued_documents() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(
            &dir,
            CompletenessPolicy::Tolerant,
            Arc::new(TextParser::default()),
            Arc::new(KeywordClassifier::default()),
        );

        let first = service
            .upload_document(b"First document. It has two sentences.", "one", None)
            .await
            .unwrap()
            .document_id;
        let second = service
            .upload_document(b"Second document. Also two.", "two", Some(5))
            .await
            .unwrap()
            .document_id;

        let handles = PipelineService::start_workers(service.clone());
        assert_eq!(handles.len(), 2);

        let wait = async {
            loop {
                let done = [&first, &second].iter().all(|id| {
                    service.db.get_document(id).unwrap().unwrap().status
                        == DocumentStatus::Completed
                });
                if done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(10), wait)
            .await
            .expect("documents should complete");

        service.shutdown();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_sweep_requeues_abandoned_task() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir, CompletenessPolicy::Tolerant);
        config.pipeline.task_timeout_secs = 0;
        let service = service_from_config(
            config,
            Arc::new(TextParser::default()),
            Arc::new(KeywordClassifier::default()),
        );
        let doc_id = service
            .upload_document(b"Abandoned sentence.", "crash", None)
            .await
            .unwrap()
            .document_id;

        // Claimed by a worker that then died
        let claimed = service.db.claim_task().unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(service.sweep_stale_tasks(Duration::ZERO), 1);
        let task = service.db.get_task(&claimed.id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.stage, Stage::StructuralParse);
        assert_eq!(
            service.db.get_document(&doc_id).unwrap().unwrap().status,
            DocumentStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_sweep_fails_document_when_retries_are_spent() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir, CompletenessPolicy::Tolerant);
        config.pipeline.task_timeout_secs = 0;
        config.pipeline.max_retries = 0;
        let service = service_from_config(
            config,
            Arc::new(TextParser::default()),
            Arc::new(KeywordClassifier::default()),
        );
        let doc_id = service
            .upload_document(b"Abandoned sentence.", "crash", None)
            .await
            .unwrap()
            .document_id;

        service.db.claim_task().unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(service.sweep_stale_tasks(Duration::ZERO), 1);
        let doc = service.db.get_document(&doc_id).unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Error);
        assert!(doc.error_recoverable);
    }
}
