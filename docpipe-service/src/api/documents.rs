//! Document API endpoints.
//!
//! Upload, status polling, task listing, retry and delete.

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{DocumentStatusReport, Task};
use crate::error::{ServiceError, ServiceResult};
use crate::service::UploadOutcome;

use super::AppState;

/// Response for delete operations
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub document_id: String,
}

fn invalid(e: impl std::fmt::Display) -> ServiceError {
    ServiceError::InvalidRequest {
        message: e.to_string(),
    }
}

/// Upload a new document.
///
/// Multipart fields: `file` (required), `title`, `priority`. Returns 201 for a
/// new document and 200 when the content was already known.
pub async fn upload_document_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ServiceResult<(StatusCode, Json<UploadOutcome>)> {
    let mut file_data: Option<(Vec<u8>, String)> = None;
    let mut title: Option<String> = None;
    let mut priority: Option<i64> = None;

    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("document").to_string();
                let data = field.bytes().await.map_err(invalid)?;
                file_data = Some((data.to_vec(), filename));
            }
            "title" => {
                let text = field.text().await.map_err(invalid)?;
                if !text.trim().is_empty() {
                    title = Some(text);
                }
            }
            "priority" => {
                let text = field.text().await.map_err(invalid)?;
                priority = Some(
                    text.trim()
                        .parse()
                        .map_err(|_| invalid(format!("priority must be an integer, got {:?}", text)))?,
                );
            }
            _ => {}
        }
    }

    let (data, filename) = file_data.ok_or_else(|| invalid("No file provided"))?;
    let title = title.unwrap_or(filename);

    let outcome = state
        .service
        .upload_document(&data, &title, priority)
        .await?;

    let status = if outcome.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

/// Current status of a document
pub async fn document_status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<DocumentStatusReport>> {
    Ok(Json(state.service.document_status(&id)?))
}

pub async fn list_document_tasks_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<Vec<Task>>> {
    Ok(Json(state.service.list_tasks(&id)?))
}

/// Resume a failed document at its first incomplete stage
pub async fn retry_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<(StatusCode, Json<Task>)> {
    let task = state.service.retry_document(&id)?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

/// Delete a document
pub async fn delete_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<DeleteResponse>> {
    state.service.delete_document(&id).await?;
    Ok(Json(DeleteResponse {
        success: true,
        document_id: id,
    }))
}
