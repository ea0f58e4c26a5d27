use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("Document processing failed")]
    Processing(#[from] ProcessingError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),
}

/// Pipeline failure taxonomy.
///
/// The variant decides what the orchestrator does with a failed stage:
/// transient failures are re-enqueued with backoff, everything else is
/// terminal for the task.
#[derive(Error, Debug)]
pub enum ProcessingError {
    /// Network failure or timeout talking to a collaborator
    #[error("Transient failure: {message}")]
    Transient { message: String },

    /// Malformed input or a failed completeness check
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// A remote resource answered "not found", which may still be propagating
    #[error("Resource not found (possibly transient): {resource}")]
    AmbiguousNotFound { resource: String },

    #[error("Retries exhausted after {attempts} attempts: {message}")]
    ExhaustedRetries { attempts: u32, message: String },

    #[error("Structural parsing failed")]
    Parser(#[from] ParserError),

    #[error("Processing cancelled for document {document_id}")]
    Cancelled { document_id: String },

    #[error("File too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("IO error")]
    Io(#[source] std::io::Error),
}

impl ProcessingError {
    /// Whether the failed stage may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProcessingError::Transient { .. }
                | ProcessingError::AmbiguousNotFound { .. }
                | ProcessingError::Parser(_)
                | ProcessingError::Io(_)
        )
    }

    /// Stable type name stored in the `errors` table
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingError::Transient { .. } => "transient",
            ProcessingError::Validation { .. } => "validation",
            ProcessingError::AmbiguousNotFound { .. } => "ambiguous_not_found",
            ProcessingError::ExhaustedRetries { .. } => "exhausted_retries",
            ProcessingError::Parser(_) => "parse_error",
            ProcessingError::Cancelled { .. } => "cancelled",
            ProcessingError::FileTooLarge { .. } => "file_too_large",
            ProcessingError::Io(_) => "io_error",
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ProcessingError::Transient { .. }
            | ProcessingError::AmbiguousNotFound { .. }
            | ProcessingError::Parser(_) => ErrorSeverity::Warning,
            ProcessingError::Cancelled { .. } => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Severity recorded alongside each persisted error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "info",
            ErrorSeverity::Warning => "warning",
            ErrorSeverity::Error => "error",
        }
    }
}

/// Structural parser client errors
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Connection failed to parser at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Parser returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response from parser")]
    InvalidResponse {
        #[source]
        source: reqwest::Error,
    },

    #[error("Parser returned no sections")]
    Empty,
}

/// Classifier client errors
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Connection failed to classifier at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Classifier returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response from classifier")]
    InvalidResponse {
        #[source]
        source: reqwest::Error,
    },

    #[error("Classifier call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Classifier rejected input: {message}")]
    Rejected { message: String },
}

/// Status monitor errors
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Connection failed to {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Status endpoint returned {status}: {message}")]
    Status { status: u16, message: String },

    /// 404 from the status endpoint; may be replication lag
    #[error("Document not found: {document_id}")]
    NotFound { document_id: String },

    #[error("Invalid status response")]
    InvalidResponse {
        #[source]
        source: reqwest::Error,
    },

    #[error("Already monitoring document {document_id}")]
    AlreadyMonitoring { document_id: String },
}

impl MonitorError {
    /// Convert a failed poll into the pipeline taxonomy
    pub fn into_processing(self) -> ProcessingError {
        match self {
            MonitorError::NotFound { document_id } => ProcessingError::AmbiguousNotFound {
                resource: format!("document {}", document_id),
            },
            other => ProcessingError::Transient {
                message: format_error_chain_ref(&other),
            },
        }
    }
}

/// API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::DocumentNotFound { .. } | ServiceError::TaskNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Processing(ProcessingError::Validation { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServiceError::Processing(ProcessingError::FileTooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::DocumentNotFound { .. } => "document_not_found",
            ServiceError::TaskNotFound { .. } => "task_not_found",
            ServiceError::Database(_) => "database_error",
            ServiceError::Processing(e) => e.kind(),
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();

        let response = ErrorResponse {
            message: format_error_chain_ref(&self),
            code: Some(code),
            details: None,
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Render an error and all of its sources as one line.
pub fn format_error_chain_ref(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
