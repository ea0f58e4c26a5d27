use async_trait::async_trait;
use reqwest::{Client, StatusCode, multipart};
use std::time::Duration;

use crate::db::{DocumentStatusReport, Task, TaskEvent};
use crate::error::MonitorError;
use crate::service::UploadOutcome;

/// Source of document status for the monitor
#[async_trait]
pub trait StatusClient: Send + Sync + 'static {
    async fn fetch_status(&self, document_id: &str) -> Result<DocumentStatusReport, MonitorError>;
}

/// Client for the pipeline service's HTTP API
#[derive(Clone)]
pub struct HttpStatusClient {
    client: Client,
    base_url: String,
}

impl HttpStatusClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MonitorError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MonitorError::Connection {
                url: base_url.clone(),
                source: e,
            })?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upload a document, returning its id and whether it was already known
    pub async fn upload(
        &self,
        content: Vec<u8>,
        filename: &str,
        title: Option<&str>,
        priority: Option<i64>,
    ) -> Result<UploadOutcome, MonitorError> {
        let url = format!("{}/api/documents", self.base_url);

        let mut form = multipart::Form::new()
            .part("file", multipart::Part::bytes(content).file_name(filename.to_string()));
        if let Some(title) = title {
            form = form.text("title", title.to_string());
        }
        if let Some(priority) = priority {
            form = form.text("priority", priority.to_string());
        }

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| MonitorError::Connection { url, source: e })?;

        let response = check_status(response, None).await?;
        response
            .json()
            .await
            .map_err(|e| MonitorError::InvalidResponse { source: e })
    }

    pub async fn list_tasks(&self, document_id: &str) -> Result<Vec<Task>, MonitorError> {
        self.get_json(
            &format!("{}/api/documents/{}/tasks", self.base_url, document_id),
            Some(document_id),
        )
        .await
    }

    pub async fn task_events(&self, task_id: &str) -> Result<Vec<TaskEvent>, MonitorError> {
        self.get_json(
            &format!("{}/api/tasks/{}/events", self.base_url, task_id),
            None,
        )
        .await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        document_id: Option<&str>,
    ) -> Result<T, MonitorError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MonitorError::Connection {
                url: url.to_string(),
                source: e,
            })?;

        let response = check_status(response, document_id).await?;
        response
            .json()
            .await
            .map_err(|e| MonitorError::InvalidResponse { source: e })
    }
}

/// Map non-success responses. A 404 on a document path becomes `NotFound`.
async fn check_status(
    response: reqwest::Response,
    document_id: Option<&str>,
) -> Result<reqwest::Response, MonitorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::NOT_FOUND
        && let Some(document_id) = document_id
    {
        return Err(MonitorError::NotFound {
            document_id: document_id.to_string(),
        });
    }

    let message = response.text().await.unwrap_or_default();
    Err(MonitorError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl StatusClient for HttpStatusClient {
    async fn fetch_status(&self, document_id: &str) -> Result<DocumentStatusReport, MonitorError> {
        self.get_json(
            &format!("{}/api/documents/{}/status", self.base_url, document_id),
            Some(document_id),
        )
        .await
    }
}
