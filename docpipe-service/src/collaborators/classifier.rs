use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use super::{Classifier, ClassifierVerdict};
use crate::config::ClassifierConfig;
use crate::error::ClassifierError;

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

/// Sentence classifier reached over HTTP: `POST {base_url}/classify` with
/// `{"text": ...}`, answering `{"label": ..., "reason": ...}`.
pub struct HttpClassifier {
    client: Client,
    config: ClassifierConfig,
}

impl HttpClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self, ClassifierError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ClassifierError::Connection {
                url: config.base_url.clone(),
                source: e,
            })?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, text: &str) -> Result<ClassifierVerdict, ClassifierError> {
        let url = format!("{}/classify", self.config.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&ClassifyRequest { text })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassifierError::Timeout {
                        timeout_ms: self.config.request_timeout_ms,
                    }
                } else {
                    ClassifierError::Connection {
                        url: url.clone(),
                        source: e,
                    }
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNPROCESSABLE_ENTITY || status == StatusCode::BAD_REQUEST {
            let message = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Rejected { message });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ClassifierError::InvalidResponse { source: e })
    }
}
