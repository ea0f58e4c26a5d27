//! WebSocket message types.
//!
//! Defines the client-to-server and server-to-client message formats
//! for the progress socket.

use serde::{Deserialize, Serialize};

use crate::db::DocumentStatusReport;
use crate::progress::ProgressUpdate;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving progress for a document
    Subscribe { document_id: String },
    /// Stop receiving progress for a document
    Unsubscribe { document_id: String },
    /// Keepalive ping
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Subscription accepted, with the document's current status
    Subscribed { status: DocumentStatusReport },
    Unsubscribed { document_id: String },
    /// Document processing progress update
    Progress(ProgressUpdate),
    /// Keepalive pong response
    Pong { timestamp: u64 },
    /// Error message
    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
}
