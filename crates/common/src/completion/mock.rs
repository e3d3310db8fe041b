//! Scriptable completion client for tests and offline runs

use super::{ChatMessage, CompletionClient, CompletionStream};
use crate::errors::{AppError, Result};
use crate::models::Role;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const MOCK_MODEL: &str = "mock-completion";

/// What the mock does for one call
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Answer with fixed text (one chunk when streamed)
    Reply(String),
    /// Answer with `Echo: <last user message>`
    Echo,
    /// Fail with a transport error
    FailTransport(String),
    /// Return a well-formed but empty completion
    Empty,
    /// Stream these chunks (their concatenation when not streamed)
    Stream(Vec<String>),
    /// Stream these chunks, then fail with a transport error
    StreamThenFail(Vec<String>),
}

/// Mock completion client
///
/// Queued behaviours are consumed one per call; once the queue is empty the
/// default behaviour applies to every call.
pub struct MockCompletionClient {
    queue: Mutex<VecDeque<MockBehavior>>,
    default: MockBehavior,
    delay: Option<Duration>,
    calls: AtomicUsize,
    last_messages: Mutex<Option<Vec<ChatMessage>>>,
}

impl MockCompletionClient {
    pub fn new(default: MockBehavior) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default,
            delay: None,
            calls: AtomicUsize::new(0),
            last_messages: Mutex::new(None),
        }
    }

    pub fn echo() -> Self {
        Self::new(MockBehavior::Echo)
    }

    pub fn replying(text: impl Into<String>) -> Self {
        Self::new(MockBehavior::Reply(text.into()))
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(MockBehavior::FailTransport(message.into()))
    }

    pub fn streaming<S: Into<String>>(chunks: impl IntoIterator<Item = S>) -> Self {
        Self::new(MockBehavior::Stream(chunks.into_iter().map(Into::into).collect()))
    }

    /// Sleep before answering, to widen race windows in tests
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a behaviour for the next unqueued call
    pub fn push(&self, behavior: MockBehavior) {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(behavior);
    }

    /// Number of `complete`/`stream_complete` invocations so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages of the most recent invocation
    pub fn last_messages(&self) -> Option<Vec<ChatMessage>> {
        self.last_messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn begin(&self, messages: Vec<ChatMessage>) -> MockBehavior {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(messages);

        let behavior = self
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.default.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        behavior
    }

    fn echo_text(&self) -> String {
        let question = self
            .last_messages()
            .and_then(|messages| {
                messages
                    .into_iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content)
            })
            .unwrap_or_default();
        format!("Echo: {}", question.trim())
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
        match self.begin(messages).await {
            MockBehavior::Reply(text) => Ok(text),
            MockBehavior::Echo => Ok(self.echo_text()),
            MockBehavior::Stream(chunks) => Ok(chunks.concat()),
            MockBehavior::FailTransport(message) => Err(AppError::CompletionTransport { message }),
            MockBehavior::StreamThenFail(_) => Err(AppError::CompletionTransport {
                message: "mock stream failure".to_string(),
            }),
            MockBehavior::Empty => Err(AppError::EmptyCompletion {
                model: MOCK_MODEL.to_string(),
            }),
        }
    }

    async fn stream_complete(&self, messages: Vec<ChatMessage>) -> Result<CompletionStream> {
        let chunks: Vec<Result<String>> = match self.begin(messages).await {
            MockBehavior::Reply(text) => vec![Ok(text)],
            MockBehavior::Echo => vec![Ok(self.echo_text())],
            MockBehavior::Stream(chunks) => chunks.into_iter().map(Ok).collect(),
            MockBehavior::StreamThenFail(chunks) => chunks
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(AppError::CompletionTransport {
                    message: "mock stream failure".to_string(),
                })))
                .collect(),
            MockBehavior::FailTransport(message) => {
                return Err(AppError::CompletionTransport { message })
            }
            MockBehavior::Empty => Vec::new(),
        };
        Ok(stream::iter(chunks).boxed())
    }

    async fn ping(&self) -> Result<()> {
        match &self.default {
            MockBehavior::FailTransport(message) => Err(AppError::CompletionTransport {
                message: message.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn model_name(&self) -> &str {
        MOCK_MODEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_queue_then_default() {
        let mock = MockCompletionClient::replying("default");
        mock.push(MockBehavior::Reply("first".to_string()));

        assert_eq!(mock.complete(vec![ChatMessage::user("a")]).await.unwrap(), "first");
        assert_eq!(mock.complete(vec![ChatMessage::user("b")]).await.unwrap(), "default");
        assert_eq!(mock.calls(), 2);
        assert_eq!(mock.last_messages().unwrap(), vec![ChatMessage::user("b")]);
    }

    #[tokio::test]
    async fn test_echo_uses_last_user_message() {
        let mock = MockCompletionClient::echo();
        let answer = mock
            .complete(vec![ChatMessage::system("persona"), ChatMessage::user(" ping ")])
            .await
            .unwrap();
        assert_eq!(answer, "Echo: ping");
    }

    #[tokio::test]
    async fn test_stream_then_fail() {
        let mock = MockCompletionClient::new(MockBehavior::StreamThenFail(vec!["a".to_string()]));
        let result: Result<Vec<String>> = mock
            .stream_complete(vec![ChatMessage::user("q")])
            .await
            .unwrap()
            .try_collect()
            .await;
        assert!(result.unwrap_err().is_transport());
    }

    #[tokio::test]
    async fn test_failing_mock_fails_ping() {
        let mock = MockCompletionClient::failing("down");
        assert!(mock.ping().await.is_err());
        assert_eq!(mock.calls(), 0);
    }
}
