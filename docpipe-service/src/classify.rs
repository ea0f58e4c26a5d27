//! Bounded-concurrency sentence classification.
//!
//! A section's sentences are cut into batches of `batch_size`. Every sentence
//! in a batch is classified concurrently, each with its own timeout and retry
//! budget, so one failing sentence never holds back or fails its neighbours.

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::collaborators::Classifier;
use crate::config::ClassifierConfig;
use crate::db::{Classification, ClassificationOutcome, Sentence};
use crate::error::{ClassifierError, ProcessingError, format_error_chain_ref};

/// Notifications emitted while a section is being classified
#[derive(Debug)]
pub enum ItemEvent<'a> {
    /// The classifier call for this sentence is about to start
    Started { sentence: &'a Sentence },
    /// The sentence has its final outcome
    Finished {
        processed: usize,
        total: usize,
        sentence_id: &'a str,
        outcome: &'a ClassificationOutcome,
    },
}

/// Tally of one `classify_section` run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct BatchClassifierRunner {
    classifier: Arc<dyn Classifier>,
    batch_size: usize,
    call_timeout: Duration,
    /// `max_attempts` is the per-sentence attempt budget
    policy: BackoffPolicy,
}

impl BatchClassifierRunner {
    pub fn new(classifier: Arc<dyn Classifier>, config: &ClassifierConfig) -> Self {
        Self {
            classifier,
            batch_size: config.batch_size.max(1),
            call_timeout: config.request_timeout(),
            policy: config.retry_policy(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Classify the given sentences, reporting every item through `on_item`.
    ///
    /// Cancellation is honoured between batches; a batch that has started is
    /// always allowed to finish so no sentence is left half-recorded.
    pub async fn classify_section<F>(
        &self,
        sentences: &[Sentence],
        cancel: &CancellationToken,
        mut on_item: F,
    ) -> Result<RunSummary, ProcessingError>
    where
        F: FnMut(ItemEvent<'_>) + Send,
    {
        let total = sentences.len();
        let mut summary = RunSummary {
            total,
            ..RunSummary::default()
        };

        for batch in sentences.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                let document_id = batch
                    .first()
                    .map(|s| s.document_id.clone())
                    .unwrap_or_default();
                return Err(ProcessingError::Cancelled { document_id });
            }

            for sentence in batch {
                on_item(ItemEvent::Started { sentence });
            }

            // Batches never exceed `batch_size`, which bounds the calls in flight
            let mut results = FuturesUnordered::new();
            for sentence in batch {
                results.push(async move { (sentence, self.classify_one(sentence).await) });
            }

            while let Some((sentence, outcome)) = results.next().await {
                match outcome.classification {
                    Classification::Success => summary.succeeded += 1,
                    _ => summary.failed += 1,
                }
                let processed = summary.succeeded + summary.failed;
                on_item(ItemEvent::Finished {
                    processed,
                    total,
                    sentence_id: &sentence.id,
                    outcome: &outcome,
                });
            }
        }

        Ok(summary)
    }

    async fn classify_one(&self, sentence: &Sentence) -> ClassificationOutcome {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.policy.delay(attempt - 1)).await;
            }

            let call = tokio::time::timeout(
                self.call_timeout,
                self.classifier.classify(&sentence.content),
            )
            .await
            .unwrap_or(Err(ClassifierError::Timeout {
                timeout_ms: self.call_timeout.as_millis() as u64,
            }));

            match call {
                Ok(verdict) => {
                    metrics::counter!("docpipe_classifier_calls_total", "outcome" => "success")
                        .increment(1);
                    return ClassificationOutcome {
                        classification: Classification::Success,
                        labels: BTreeMap::from([(verdict.label, true)]),
                        retry_count: attempt,
                        explanation: verdict.reason,
                    };
                }
                Err(e) => {
                    metrics::counter!("docpipe_classifier_calls_total", "outcome" => "error")
                        .increment(1);
                    last_error = format_error_chain_ref(&e);
                    debug!(
                        sentence_id = %sentence.id,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %last_error,
                        "Classifier call failed"
                    );
                }
            }
        }

        warn!(
            sentence_id = %sentence.id,
            attempts = attempts,
            error = %last_error,
            "Classifier retries exhausted"
        );
        ClassificationOutcome {
            classification: Classification::Error,
            labels: BTreeMap::new(),
            retry_count: attempts - 1,
            explanation: Some(format!(
                "Classification failed: retries exhausted after {} attempts: {}",
                attempts, last_error
            )),
        }
    }
}
