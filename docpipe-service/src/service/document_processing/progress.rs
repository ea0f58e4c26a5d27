//! Event log and progress broadcast helpers.

use tracing::warn;

use crate::db::{DocumentStatus, Stage, Task};
use crate::progress::ProgressUpdate;
use crate::service::PipelineService;

impl PipelineService {
    /// Append an event to a task's log. Failures are logged, never propagated:
    /// losing a progress row must not fail the stage.
    pub(crate) fn record_event(
        &self,
        task: &Task,
        event_type: &str,
        percentage: f64,
        message: &str,
        details: Option<serde_json::Value>,
    ) {
        if let Err(e) = self.db.append_event(
            &task.id,
            event_type,
            task.stage.step_number() as u32,
            Stage::COUNT as u32,
            percentage,
            message,
            details.as_ref(),
        ) {
            warn!(
                task_id = %task.id,
                event_type = %event_type,
                error = %e,
                "Failed to append task event"
            );
        }
    }

    /// Broadcast a progress update for a document
    pub(crate) fn broadcast_document_progress(
        &self,
        document_id: &str,
        status: DocumentStatus,
        stage: Option<Stage>,
        percentage: f64,
        message: &str,
        error: Option<&str>,
    ) {
        self.progress.publish(ProgressUpdate {
            document_id: document_id.to_string(),
            status,
            stage,
            step_number: stage.map(|s| s.step_number() as u32).unwrap_or(0),
            total_steps: Stage::COUNT as u32,
            percentage,
            message: message.to_string(),
            error: error.map(String::from),
        });
    }

    /// Record an event and broadcast the same progress in one step
    pub(crate) fn report_progress(
        &self,
        task: &Task,
        event_type: &str,
        percentage: f64,
        message: &str,
        details: Option<serde_json::Value>,
    ) {
        self.record_event(task, event_type, percentage, message, details);
        self.broadcast_document_progress(
            &task.document_id,
            DocumentStatus::Processing,
            Some(task.stage),
            percentage,
            message,
            None,
        );
    }
}
