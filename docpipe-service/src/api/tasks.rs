//! Task audit-log endpoints.

use axum::{
    Json,
    extract::{Path, State},
};
use std::sync::Arc;

use crate::db::{TaskError, TaskEvent};
use crate::error::ServiceResult;

use super::AppState;

/// Progress events of a task, oldest first
pub async fn task_events_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<Vec<TaskEvent>>> {
    Ok(Json(state.service.task_events(&id)?))
}

/// Errors recorded against a task, oldest first
pub async fn task_errors_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<Vec<TaskError>>> {
    Ok(Json(state.service.task_errors(&id)?))
}
