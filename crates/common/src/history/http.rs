//! HTTP adapter for the history service

use super::HistoryStore;
use crate::errors::{AppError, Result};
use crate::knowledge::read_envelope;
use crate::models::Answer;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const COLLABORATOR: &str = "history";

/// History service client (`POST {base_url}/history/save`)
#[derive(Debug, Clone)]
pub struct HttpHistoryClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHistoryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl HistoryStore for HttpHistoryClient {
    async fn append(&self, answer: &Answer) -> Result<()> {
        let url = format!("{}/history/save", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(answer)
            .send()
            .await
            .map_err(|e| AppError::collaborator(COLLABORATOR, format!("Request failed: {}", e)))?;

        read_envelope::<serde_json::Value>(response, COLLABORATOR).await?;
        debug!(user_id = answer.user_id, "History record saved");
        Ok(())
    }
}
