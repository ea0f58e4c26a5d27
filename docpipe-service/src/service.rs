//! Pipeline orchestration.
//!
//! `PipelineService` owns everything a stage needs: the store, the blob
//! directory, the external collaborators and the progress hub. Stage logic
//! lives in [`document_processing`].

mod document_processing;

pub use document_processing::UploadOutcome;

use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::classify::BatchClassifierRunner;
use crate::collaborators::{Classifier, StructuralParser};
use crate::config::AppConfig;
use crate::db::Database;
use crate::ingestion::BlobStore;
use crate::progress::ProgressHub;

/// Main service coordinator
pub struct PipelineService {
    pub config: Arc<AppConfig>,
    pub db: Arc<Database>,
    pub blobs: BlobStore,
    pub progress: Arc<ProgressHub>,
    parser: Arc<dyn StructuralParser>,
    runner: BatchClassifierRunner,
    /// Tokens for in-flight documents, cancelled on delete
    processing_cancellation_tokens: DashMap<String, CancellationToken>,
    /// Stops the worker pool and the stale-task sweeper
    shutdown: CancellationToken,
}

impl PipelineService {
    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<Database>,
        parser: Arc<dyn StructuralParser>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        info!(
            workers = config.pipeline.workers,
            batch_size = config.classifier.batch_size,
            completeness_policy = ?config.pipeline.completeness_policy,
            "Initializing pipeline service"
        );

        let runner = BatchClassifierRunner::new(classifier, &config.classifier);
        let blobs = BlobStore::new(config.storage.blob_dir());

        Self {
            config,
            db,
            blobs,
            progress: Arc::new(ProgressHub::new()),
            parser,
            runner,
            processing_cancellation_tokens: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Signal background workers to stop after their current task
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
