//! HTTP adapter for the knowledge service

use super::KnowledgeLookup;
use crate::errors::{AppError, Result};
use crate::models::{ApiResponse, KnowledgeEntry};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const COLLABORATOR: &str = "knowledge";

/// Knowledge service client speaking the `{code, message, data}` envelope
#[derive(Debug, Clone)]
pub struct HttpKnowledgeClient {
    client: reqwest::Client,
    base_url: String,
}

// The service returns its full entity; only the pair matters here.
#[derive(Debug, Deserialize)]
struct KnowledgeRecord {
    question: Option<String>,
    answer: Option<String>,
}

// Search hits arrive as full entities from the knowledge service itself and
// as bare answer strings from older proxies.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchHit {
    Text(String),
    Record(KnowledgeRecord),
}

impl SearchHit {
    fn into_snippet(self) -> Option<String> {
        let text = match self {
            SearchHit::Text(text) => text,
            SearchHit::Record(record) => record.answer?,
        };
        (!text.trim().is_empty()).then_some(text)
    }
}

impl HttpKnowledgeClient {
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
impl KnowledgeLookup for HttpKnowledgeClient {
    async fn find_exact(&self, question: &str) -> Result<Option<KnowledgeEntry>> {
        let url = format!("{}/knowledge/exact", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("question", question)])
            .send()
            .await
            .map_err(|e| AppError::collaborator(COLLABORATOR, format!("Request failed: {}", e)))?;

        let record: Option<KnowledgeRecord> = read_envelope(response, COLLABORATOR).await?;

        let entry = record.and_then(|record| match record.answer {
            Some(answer) if !answer.trim().is_empty() => Some(KnowledgeEntry {
                question: record.question.unwrap_or_else(|| question.to_string()),
                answer,
            }),
            _ => None,
        });
        debug!(found = entry.is_some(), "Knowledge exact lookup");
        Ok(entry)
    }

    async fn search(&self, query: &str) -> Result<Vec<String>> {
        let url = format!("{}/knowledge/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("query", query)])
            .send()
            .await
            .map_err(|e| AppError::collaborator(COLLABORATOR, format!("Request failed: {}", e)))?;

        let hits: Option<Vec<SearchHit>> = read_envelope(response, COLLABORATOR).await?;
        let snippets: Vec<String> = hits
            .unwrap_or_default()
            .into_iter()
            .filter_map(SearchHit::into_snippet)
            .collect();
        debug!(count = snippets.len(), "Knowledge search");
        Ok(snippets)
    }
}

/// Unwrap a collaborator envelope, treating non-2xx and non-200 codes as errors
pub(crate) async fn read_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
    collaborator: &str,
) -> Result<Option<T>> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::collaborator(
            collaborator,
            format!("HTTP {}: {}", status, body),
        ));
    }

    let envelope: ApiResponse<T> = response.json().await.map_err(|e| {
        AppError::collaborator(collaborator, format!("Failed to parse response: {}", e))
    })?;

    if !envelope.is_success() {
        return Err(AppError::collaborator(
            collaborator,
            format!("code {}: {}", envelope.code, envelope.message),
        ));
    }

    Ok(envelope.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpKnowledgeClient {
        HttpKnowledgeClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_exact_hit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/knowledge/exact"))
            .and(query_param("question", "What are your hours?"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 200,
                "message": "Success",
                "data": {"id": 3, "question": "What are your hours?", "answer": "9 to 5"}
            })))
            .mount(&server)
            .await;

        let entry = client_for(&server)
            .find_exact("What are your hours?")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.answer, "9 to 5");
    }

    #[tokio::test]
    async fn test_exact_miss_and_blank_answer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/knowledge/exact"))
            .and(query_param("question", "unknown"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 200, "message": "Success", "data": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/knowledge/exact"))
            .and(query_param("question", "blank"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 200, "message": "Success", "data": {"question": "blank", "answer": " "}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.find_exact("unknown").await.unwrap().is_none());
        assert!(client.find_exact("blank").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_error_envelope_is_collaborator_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/knowledge/exact"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 500, "message": "database down", "data": null
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).find_exact("Hello").await.unwrap_err();
        assert!(matches!(err, AppError::Collaborator { .. }));
        assert!(err.to_string().contains("database down"));
    }

    #[tokio::test]
    async fn test_search_maps_entities_to_answers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/knowledge/search"))
            .and(query_param("query", "refund"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 200,
                "message": "Success",
                "data": [
                    {"id": 1, "question": "Refund policy", "answer": "Refunds take 3 days.", "category": "billing"},
                    {"id": 2, "question": "Refund fees", "answer": "  "},
                    {"id": 3, "question": "Refund status"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let snippets = client_for(&server).search("refund").await.unwrap();
        assert_eq!(snippets, vec!["Refunds take 3 days.".to_string()]);
    }

    #[tokio::test]
    async fn test_search_snippets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/knowledge/search"))
            .and(query_param("query", "refund"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 200,
                "message": "Success",
                "data": ["Refunds take 3 days.", ""]
            })))
            .mount(&server)
            .await;

        let snippets = client_for(&server).search("refund").await.unwrap();
        assert_eq!(snippets, vec!["Refunds take 3 days.".to_string()]);
    }

    #[tokio::test]
    async fn test_http_failure_is_collaborator_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/knowledge/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server).search("refund").await.unwrap_err();
        assert!(matches!(err, AppError::Collaborator { .. }));
    }
}
