//! HTTP API for the pipeline service.
//!
//! This module provides the REST API endpoints for:
//! - Health and metrics monitoring
//! - Document upload, status, retry and delete
//! - Task event and error logs
//! - WebSocket progress connections

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::service::PipelineService;
use crate::websocket::{WebSocketManager, handle_ws_connection};

pub mod documents;
pub mod tasks;
use documents::{
    delete_document_handler, document_status_handler, list_document_tasks_handler,
    retry_document_handler, upload_document_handler,
};
use tasks::{task_errors_handler, task_events_handler};

/// Application state
pub struct AppState {
    pub service: Arc<PipelineService>,
    pub start_time: Instant,
    pub ws_manager: Arc<WebSocketManager>,
    /// Absent when no global recorder was installed (tests)
    pub metrics: Option<PrometheusHandle>,
}

/// Build the API router
pub fn router(service: Arc<PipelineService>, metrics: Option<PrometheusHandle>) -> Router {
    // Multipart framing on top of the document itself
    let max_body_size = service.config.limits.max_document_size_bytes as usize + 64 * 1024;

    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
        ws_manager: Arc::new(WebSocketManager::new()),
        metrics,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route(
            "/documents",
            post(upload_document_handler).layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route(
            "/documents/{id}",
            axum::routing::delete(delete_document_handler),
        )
        .route("/documents/{id}/status", get(document_status_handler))
        .route("/documents/{id}/tasks", get(list_document_tasks_handler))
        .route("/documents/{id}/retry", post(retry_document_handler))
        .route("/tasks/{id}/events", get(task_events_handler))
        .route("/tasks/{id}/errors", get(task_errors_handler));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health & Metrics ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let database_ok = state.service.db.ping().is_ok();

    Json(HealthResponse {
        status: if database_ok { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        database_available: database_ok,
        websocket_connections: state.ws_manager.connection_count(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub database_available: bool,
    pub websocket_connections: usize,
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

// === WebSocket ===

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| {
        handle_ws_connection(socket, state.ws_manager.clone(), state.service.clone())
    })
}
