//! Cancellation token management for document processing.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::service::PipelineService;

impl PipelineService {
    /// Token for a document being processed, created on first use.
    pub(crate) fn processing_token(&self, document_id: &str) -> CancellationToken {
        self.processing_cancellation_tokens
            .entry(document_id.to_string())
            .or_default()
            .clone()
    }

    /// Cancel processing for a document if in progress.
    pub(crate) fn cancel_document_processing(&self, document_id: &str) -> bool {
        if let Some((_, token)) = self.processing_cancellation_tokens.remove(document_id) {
            token.cancel();
            info!(doc_id = %document_id, "Document processing cancellation triggered");
            true
        } else {
            false
        }
    }

    /// Remove a cancellation token once the document reaches a terminal state.
    pub(crate) fn unregister_processing_token(&self, document_id: &str) {
        self.processing_cancellation_tokens.remove(document_id);
    }

    /// Check if processing should continue for a document.
    pub(crate) fn check_cancellation(
        &self,
        document_id: &str,
        token: &CancellationToken,
    ) -> ServiceResult<()> {
        if token.is_cancelled() {
            Err(ServiceError::Processing(ProcessingError::Cancelled {
                document_id: document_id.to_string(),
            }))
        } else {
            Ok(())
        }
    }
}
