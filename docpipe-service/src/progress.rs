//! Per-document progress fan-out.
//!
//! The orchestrator publishes a [`ProgressUpdate`] at every stage transition and
//! after every classified sentence. Observers (the WebSocket endpoint, tests)
//! subscribe per document. Channels are created lazily on first subscribe and
//! dropped once the document reaches a terminal state, which closes every
//! receiver after it has drained the final update.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::db::{DocumentStatus, Stage};

const CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub document_id: String,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub step_number: u32,
    pub total_steps: u32,
    /// Whole-document progress, 0 to 100
    pub percentage: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Progress through the whole pipeline when `fraction` of `stage` is done
pub fn overall_percentage(stage: Stage, fraction: f64) -> f64 {
    let done = (stage.step_number() - 1) as f64 + fraction.clamp(0.0, 1.0);
    (done * 100.0 / Stage::COUNT as f64).clamp(0.0, 100.0)
}

#[derive(Default)]
pub struct ProgressHub {
    channels: DashMap<String, broadcast::Sender<ProgressUpdate>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, document_id: &str) -> broadcast::Receiver<ProgressUpdate> {
        self.channels
            .entry(document_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Deliver an update to current subscribers of the document, if any.
    /// Terminal updates close the document's channel.
    pub fn publish(&self, update: ProgressUpdate) {
        let terminal = update.status.is_terminal();
        let document_id = update.document_id.clone();

        if let Some(sender) = self.channels.get(&document_id) {
            let delivered = sender.send(update).unwrap_or(0);
            debug!(doc_id = %document_id, delivered = delivered, "Progress published");
        }

        if terminal {
            self.close(&document_id);
        }
    }

    /// Drop a document's channel, ending every subscription to it
    pub fn close(&self, document_id: &str) {
        self.channels.remove(document_id);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(status: DocumentStatus, percentage: f64) -> ProgressUpdate {
        ProgressUpdate {
            document_id: "doc".into(),
            status,
            stage: Some(Stage::Classification),
            step_number: 4,
            total_steps: 5,
            percentage,
            message: "classifying".into(),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_until_terminal() {
        let hub = ProgressHub::new();
        let mut rx = hub.subscribe("doc");

        hub.publish(update(DocumentStatus::Processing, 70.0));
        hub.publish(update(DocumentStatus::Completed, 100.0));

        assert_eq!(rx.recv().await.unwrap().percentage, 70.0);
        assert_eq!(rx.recv().await.unwrap().status, DocumentStatus::Completed);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn test_publish_without_subscribers_is_a_no_op() {
        let hub = ProgressHub::new();
        hub.publish(update(DocumentStatus::Processing, 10.0));
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn test_overall_percentage() {
        assert_eq!(overall_percentage(Stage::StructuralParse, 0.0), 0.0);
        assert_eq!(overall_percentage(Stage::Classification, 0.5), 70.0);
        assert_eq!(overall_percentage(Stage::Finalize, 1.0), 100.0);
    }

    #[test]
    fn test_update_serializes_stage_name() {
        let json = serde_json::to_value(update(DocumentStatus::Processing, 60.0)).unwrap();
        assert_eq!(json["stage"], "classification");
        assert_eq!(json["status"], "processing");
        assert!(json.get("error").is_none());
    }
}
