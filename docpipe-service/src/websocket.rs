//! WebSocket support for real-time document processing updates
//!
//! Clients subscribe to individual documents and receive every
//! [`ProgressUpdate`](crate::progress::ProgressUpdate) the pipeline publishes
//! for them, without polling.

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, error, info, warn};

use crate::error::ServiceError;
use crate::progress::ProgressHub;
use crate::service::PipelineService;

pub mod messages;

pub use messages::{ClientMessage, ServerMessage};

/// State for a single WebSocket connection
struct ConnectionState {
    tx: mpsc::UnboundedSender<ServerMessage>,
    /// Forwarding task per subscribed document
    subscriptions: HashMap<String, JoinHandle<()>>,
}

/// Manager for all WebSocket connections
///
/// Handles connection lifecycle and per-document subscriptions.
pub struct WebSocketManager {
    connections: DashMap<String, ConnectionState>,
}

impl Default for WebSocketManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    fn add_connection(&self, session_id: String, tx: mpsc::UnboundedSender<ServerMessage>) {
        debug!(session_id = %session_id, "Adding WebSocket connection");
        self.connections.insert(
            session_id,
            ConnectionState {
                tx,
                subscriptions: HashMap::new(),
            },
        );
    }

    /// Remove a connection and stop all of its forwarding tasks
    fn remove_connection(&self, session_id: &str) {
        debug!(session_id = %session_id, "Removing WebSocket connection");
        if let Some((_, conn)) = self.connections.remove(session_id) {
            for handle in conn.subscriptions.into_values() {
                handle.abort();
            }
        }
    }

    /// Forward `hub` updates for `document_id` to a connection.
    ///
    /// Returns false for unknown sessions. Subscribing twice is a no-op.
    pub fn subscribe(&self, session_id: &str, document_id: &str, hub: &ProgressHub) -> bool {
        let Some(mut conn) = self.connections.get_mut(session_id) else {
            return false;
        };
        if conn
            .subscriptions
            .get(document_id)
            .is_some_and(|handle| !handle.is_finished())
        {
            return true;
        }

        let mut updates = BroadcastStream::new(hub.subscribe(document_id));
        let tx = conn.tx.clone();
        let doc_id = document_id.to_string();
        let handle = tokio::spawn(async move {
            while let Some(item) = updates.next().await {
                match item {
                    Ok(update) => {
                        if tx.send(ServerMessage::Progress(update)).is_err() {
                            break;
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        debug!(doc_id = %doc_id, skipped = skipped, "Subscriber lagged behind progress updates");
                    }
                }
            }
        });

        conn.subscriptions.insert(document_id.to_string(), handle);
        debug!(session_id = %session_id, doc_id = %document_id, "Subscribed to document progress");
        true
    }

    pub fn unsubscribe(&self, session_id: &str, document_id: &str) -> bool {
        let removed = self
            .connections
            .get_mut(session_id)
            .and_then(|mut conn| conn.subscriptions.remove(document_id));
        match removed {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Send a message to a specific connection
    pub fn send_to(&self, session_id: &str, msg: ServerMessage) {
        if let Some(conn) = self.connections.get(session_id)
            && conn.tx.send(msg).is_err()
        {
            warn!(session_id = %session_id, "Failed to send message to connection");
        }
    }

    /// Get the number of active connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

/// Handle a WebSocket connection
///
/// Runs for the lifetime of the socket: incoming messages are handled in
/// place, outgoing messages are funnelled through a per-connection channel.
pub async fn handle_ws_connection(
    socket: WebSocket,
    ws_manager: Arc<WebSocketManager>,
    service: Arc<PipelineService>,
) {
    let session_id = uuid::Uuid::new_v4().to_string();
    info!(session_id = %session_id, "New WebSocket connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<ServerMessage>();
    ws_manager.add_connection(session_id.clone(), msg_tx);

    let session_id_clone = session_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to serialize WebSocket message");
                }
            }
        }
        debug!(session_id = %session_id_clone, "WebSocket send task ended");
    });

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_client_message(&session_id, &text, &ws_manager, &service);
            }
            Ok(Message::Binary(data)) => {
                if let Ok(text) = String::from_utf8(data.to_vec()) {
                    handle_client_message(&session_id, &text, &ws_manager, &service);
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "WebSocket connection closed by client");
                break;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    ws_manager.remove_connection(&session_id);
    send_task.abort();
    info!(session_id = %session_id, "WebSocket connection closed");
}

/// Handle a client message
fn handle_client_message(
    session_id: &str,
    text: &str,
    ws_manager: &WebSocketManager,
    service: &PipelineService,
) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Failed to parse client message");
            ws_manager.send_to(
                session_id,
                ServerMessage::Error {
                    code: "parse_error".to_string(),
                    message: format!("Failed to parse message: {}", e),
                    recoverable: true,
                },
            );
            return;
        }
    };

    match msg {
        ClientMessage::Subscribe { document_id } => {
            let status = match service.document_status(&document_id) {
                Ok(status) => status,
                Err(e) => {
                    let code = match e {
                        ServiceError::DocumentNotFound { .. } => "not_found",
                        _ => "internal_error",
                    };
                    ws_manager.send_to(
                        session_id,
                        ServerMessage::Error {
                            code: code.to_string(),
                            message: e.to_string(),
                            recoverable: false,
                        },
                    );
                    return;
                }
            };

            // Terminal documents publish nothing further
            if !status.status.is_terminal() {
                ws_manager.subscribe(session_id, &document_id, &service.progress);
            }
            ws_manager.send_to(session_id, ServerMessage::Subscribed { status });
        }
        ClientMessage::Unsubscribe { document_id } => {
            ws_manager.unsubscribe(session_id, &document_id);
            ws_manager.send_to(session_id, ServerMessage::Unsubscribed { document_id });
        }
        ClientMessage::Ping => {
            let timestamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);

            ws_manager.send_to(session_id, ServerMessage::Pong { timestamp });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DocumentStatus, Stage};
    use crate::progress::ProgressUpdate;

    fn update(status: DocumentStatus, percentage: f64) -> ProgressUpdate {
        ProgressUpdate {
            document_id: "doc-1".into(),
            status,
            stage: Some(Stage::Segmentation),
            step_number: 3,
            total_steps: 5,
            percentage,
            message: "segmenting".into(),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_subscription_forwards_published_updates() {
        let manager = WebSocketManager::new();
        let hub = ProgressHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.add_connection("session".into(), tx);

        assert!(manager.subscribe("session", "doc-1", &hub));
        assert!(!manager.subscribe("other", "doc-1", &hub));

        hub.publish(update(DocumentStatus::Processing, 40.0));
        hub.publish(update(DocumentStatus::Completed, 100.0));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ServerMessage::Progress(ref u) if u.percentage == 40.0));
        let second = rx.recv().await.unwrap();
        assert!(
            matches!(second, ServerMessage::Progress(ref u) if u.status == DocumentStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_and_disconnect() {
        let manager = WebSocketManager::new();
        let hub = ProgressHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.add_connection("session".into(), tx);

        manager.subscribe("session", "doc-1", &hub);
        assert!(manager.unsubscribe("session", "doc-1"));
        assert!(!manager.unsubscribe("session", "doc-1"));
        tokio::task::yield_now().await;

        hub.publish(update(DocumentStatus::Processing, 40.0));
        manager.send_to("session", ServerMessage::Pong { timestamp: 1 });
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMessage::Pong { timestamp: 1 }
        ));

        assert_eq!(manager.connection_count(), 1);
        manager.remove_connection("session");
        assert_eq!(manager.connection_count(), 0);
    }
}
