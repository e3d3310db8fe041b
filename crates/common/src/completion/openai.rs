//! OpenAI-compatible chat completion client (`POST {base_url}/chat/completions`)

use super::{ChatMessage, ChatRequest, CompletionClient, CompletionStream};
use crate::config::CompletionConfig;
use crate::errors::{AppError, Result};
use crate::metrics::record_completion;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// Completion client for DeepSeek, OpenAI and compatible servers
///
/// Cheap to share: `reqwest::Client` is reference counted internally.
#[derive(Debug, Clone)]
pub struct OpenAiCompletionClient {
    client: reqwest::Client,
    config: CompletionConfig,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// One decoded server-sent event
#[derive(Debug, PartialEq)]
enum Frame {
    Content(String),
    Skip,
    Done,
    Error(String),
}

impl OpenAiCompletionClient {
    /// Create a new client
    pub fn new(config: CompletionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        Ok(Self { client, config, endpoint })
    }

    fn request(&self, messages: Vec<ChatMessage>, stream: bool) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: Some(self.config.temperature),
            stream,
        }
    }

    fn post(&self, request: &ChatRequest) -> reqwest::RequestBuilder {
        let builder = self.client.post(&self.endpoint).json(request);
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, request: &ChatRequest, timeout: Duration) -> Result<reqwest::Response> {
        request.validate()?;

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            stream = request.stream,
            "Sending completion request"
        );

        let response = self
            .post(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        check_status(response).await
    }

    async fn complete_inner(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let request = self.request(messages, false);
        let timeout = self.config.timeout();
        let response = self.send(&request, timeout).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        trace!(choices = parsed.choices.len(), "Received completion response");

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| AppError::EmptyCompletion {
                model: self.config.model.clone(),
            })
    }

    async fn open_stream(&self, messages: Vec<ChatMessage>) -> Result<CompletionStream> {
        let request = self.request(messages, true);
        let idle_timeout = self.config.timeout();

        request.validate()?;
        debug!(model = %request.model, messages = request.messages.len(), "Opening completion stream");

        // Only the handshake and the gaps between frames are bounded.
        let response = tokio::time::timeout(idle_timeout, self.post(&request).send())
            .await
            .map_err(|_| AppError::CompletionTimeout {
                timeout_ms: idle_timeout.as_millis() as u64,
            })?
            .map_err(|e| transport_error(e, idle_timeout))?;
        let response = check_status(response).await?;

        let events = Box::pin(response.bytes_stream().eventsource());

        let fragments = stream::unfold(Some(events), move |state| async move {
            let mut events = state?;
            loop {
                let event = match tokio::time::timeout(idle_timeout, events.next()).await {
                    Ok(Some(Ok(event))) => event,
                    Ok(Some(Err(e))) => {
                        error!(error = %e, "Completion stream error");
                        return Some((
                            Err(AppError::CompletionTransport {
                                message: format!("SSE stream error: {}", e),
                            }),
                            None,
                        ));
                    }
                    Ok(None) => {
                        error!("Completion stream closed before [DONE]");
                        return Some((
                            Err(AppError::CompletionTransport {
                                message: "SSE stream closed before response completed".to_string(),
                            }),
                            None,
                        ));
                    }
                    Err(_) => {
                        error!(idle_secs = idle_timeout.as_secs(), "Completion stream idle timeout");
                        return Some((
                            Err(AppError::CompletionTimeout {
                                timeout_ms: idle_timeout.as_millis() as u64,
                            }),
                            None,
                        ));
                    }
                };

                match parse_frame(&event.data) {
                    Frame::Content(text) => return Some((Ok(text), Some(events))),
                    Frame::Skip => continue,
                    Frame::Done => return None,
                    Frame::Error(message) => {
                        error!(error = %message, "Completion stream reported an error");
                        return Some((Err(AppError::CompletionTransport { message }), None));
                    }
                }
            }
        });

        Ok(fragments.boxed())
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let start = Instant::now();
        let result = self.complete_inner(messages).await;
        record_completion(
            start.elapsed().as_secs_f64(),
            &self.config.model,
            false,
            result.is_ok(),
        );
        if let Err(e) = &result {
            warn!(error = %e, model = %self.config.model, "Completion failed");
        }
        result
    }

    async fn stream_complete(&self, messages: Vec<ChatMessage>) -> Result<CompletionStream> {
        let start = Instant::now();
        let result = self.open_stream(messages).await;
        record_completion(
            start.elapsed().as_secs_f64(),
            &self.config.model,
            true,
            result.is_ok(),
        );
        result
    }

    async fn ping(&self) -> Result<()> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage::user("Hello")],
            max_tokens: 5,
            temperature: None,
            stream: false,
        };
        self.send(&request, self.config.ping_timeout()).await?;
        debug!(model = %self.config.model, "Completion provider reachable");
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> AppError {
    if err.is_timeout() {
        AppError::CompletionTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        AppError::CompletionTransport {
            message: format!("Request failed: {}", err),
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|envelope| envelope.error.message)
        .unwrap_or(body);

    error!(status = status.as_u16(), error = %detail, "Completion API returned an error status");
    Err(AppError::CompletionTransport {
        message: format!("API error {}: {}", status, detail),
    })
}

fn parse_frame(data: &str) -> Frame {
    let data = data.trim();
    if data.is_empty() {
        return Frame::Skip;
    }
    if data == "[DONE]" {
        return Frame::Done;
    }

    let json: Value = match serde_json::from_str(data) {
        Ok(json) => json,
        Err(e) => return Frame::Error(format!("SSE parsing error: {}, data: {}", e, data)),
    };

    if let Some(error) = json.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .unwrap_or("An error occurred during streaming");
        return Frame::Error(format!("SSE API error: {}", message));
    }

    match json
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        Some(content) if !content.is_empty() => Frame::Content(content.to_string()),
        _ => Frame::Skip,
    }
}
