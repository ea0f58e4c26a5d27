use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::{ParsedSection, StructuralParser};
use crate::config::ParserConfig;
use crate::error::ParserError;

/// Structural parser reached over HTTP: `POST {base_url}/parse` with the raw
/// document bytes as the body.
pub struct HttpStructuralParser {
    client: Client,
    config: ParserConfig,
}

impl HttpStructuralParser {
    pub fn new(config: ParserConfig) -> Result<Self, ParserError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ParserError::Connection {
                url: config.base_url.clone(),
                source: e,
            })?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl StructuralParser for HttpStructuralParser {
    async fn parse(&self, content: Bytes) -> Result<Vec<ParsedSection>, ParserError> {
        let url = format!("{}/parse", self.config.base_url.trim_end_matches('/'));
        let size = content.len();

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content)
            .send()
            .await
            .map_err(|e| ParserError::Connection {
                url: url.clone(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ParserError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let sections: Vec<ParsedSection> = response
            .json()
            .await
            .map_err(|e| ParserError::InvalidResponse { source: e })?;

        if sections.is_empty() {
            return Err(ParserError::Empty);
        }

        debug!(bytes = size, sections = sections.len(), "Structural parse complete");
        Ok(sections)
    }
}
