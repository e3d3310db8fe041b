//! Answer resolution engine
//!
//! Decides where an answer comes from, in order: the answer cache, the
//! knowledge service, then the completion model. Every failure along the way
//! is turned into a deterministic fallback answer, so resolution itself
//! never fails. Resolved exchanges are recorded in the history store on a
//! detached task.

use crate::cache::{normalize_key, AnswerCache, RedisAnswerTier};
use crate::classifier::ContextClassifier;
use crate::completion::{
    create_completion_client, multi_turn_messages, single_turn_messages, CompletionClient,
    CompletionStream,
};
use crate::config::{AppConfig, CacheConfig};
use crate::errors::{AppError, Result};
use crate::history::{create_history_store, HistoryStore};
use crate::knowledge::{create_knowledge_lookup, KnowledgeLookup};
use crate::metrics::{record_history_failure, record_resolution};
use crate::models::{Answer, ConversationTurn, KnowledgeEntry, Question};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Marker present in every degraded answer
pub const FALLBACK_MARKER: &str = "service is temporarily unavailable";

/// Where a resolved answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerSource {
    Cache,
    Knowledge,
    Model,
    Fallback,
}

impl AnswerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerSource::Cache => "cache",
            AnswerSource::Knowledge => "knowledge",
            AnswerSource::Model => "model",
            AnswerSource::Fallback => "fallback",
        }
    }
}

/// An answer together with its provenance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub answer: Answer,
    pub source: AnswerSource,
}

impl Resolution {
    fn new(answer: Answer, source: AnswerSource) -> Self {
        Self { answer, source }
    }

    pub fn is_degraded(&self) -> bool {
        self.source == AnswerSource::Fallback
    }
}

/// Text of the degraded answer for `question`
pub fn fallback_text(question: &str, error: &AppError) -> String {
    format!(
        "Sorry, the {}. Your question was: \"{}\".\n\nError: {}\n\nPlease try again later or contact support.",
        FALLBACK_MARKER, question, error
    )
}

/// Degraded answer addressed to the asker
pub fn fallback_answer(question: &Question, error: &AppError) -> Answer {
    Answer::new(
        fallback_text(&question.content, error),
        question.content.clone(),
        question.user_id,
    )
}

/// The resolution pipeline and its collaborators
///
/// Cloning is cheap; every collaborator is shared.
#[derive(Clone)]
pub struct ResolutionEngine {
    cache: Arc<AnswerCache>,
    knowledge: Arc<dyn KnowledgeLookup>,
    completion: Arc<dyn CompletionClient>,
    history: Arc<dyn HistoryStore>,
    classifier: ContextClassifier,
    max_history_turns: usize,
}

impl ResolutionEngine {
    pub fn new(
        cache: Arc<AnswerCache>,
        knowledge: Arc<dyn KnowledgeLookup>,
        completion: Arc<dyn CompletionClient>,
        history: Arc<dyn HistoryStore>,
    ) -> Result<Self> {
        Ok(Self {
            cache,
            knowledge,
            completion,
            history,
            classifier: ContextClassifier::new()?,
            max_history_turns: 10,
        })
    }

    /// Number of prior turns sent with a contextual question
    pub fn with_max_history_turns(mut self, turns: usize) -> Self {
        self.max_history_turns = turns;
        self
    }

    /// Wire up the engine and its collaborators from configuration
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let mut cache = AnswerCache::new().with_ttl(config.cache.ttl());
        if let Some(tier) = connect_shared_tier(&config.cache).await {
            cache = cache.with_tier(Arc::new(tier));
        }

        let engine = Self::new(
            Arc::new(cache),
            create_knowledge_lookup(&config.collaborators)?,
            create_completion_client(&config.completion)?,
            create_history_store(&config.collaborators)?,
        )?;
        Ok(engine.with_max_history_turns(config.resolution.max_history_turns))
    }

    pub fn cache(&self) -> &AnswerCache {
        &self.cache
    }

    pub fn completion(&self) -> &Arc<dyn CompletionClient> {
        &self.completion
    }

    pub fn knowledge(&self) -> &Arc<dyn KnowledgeLookup> {
        &self.knowledge
    }

    /// Answer `question`, using `history` when the question depends on it
    pub async fn resolve(&self, question: &Question, history: &[ConversationTurn]) -> Answer {
        self.resolve_with_source(question, history).await.answer
    }

    /// Like [`resolve`](Self::resolve), also reporting where the answer came from
    #[instrument(skip_all, fields(user_id = question.user_id, turns = history.len()))]
    pub async fn resolve_with_source(
        &self,
        question: &Question,
        history: &[ConversationTurn],
    ) -> Resolution {
        let start = Instant::now();
        let outcome = self.try_resolve(question, history).await;
        self.settle(question, outcome, start, !history.is_empty())
    }

    /// Answer a stand-alone question, extending the system prompt with `snippets`
    #[instrument(skip_all, fields(user_id = question.user_id, snippets = snippets.len()))]
    pub async fn resolve_single_turn(&self, question: &Question, snippets: &[String]) -> Resolution {
        let start = Instant::now();
        let outcome = self.single_turn(question, snippets).await;
        self.settle(question, outcome, start, false)
    }

    /// Stream the answer to a stand-alone question chunk by chunk
    ///
    /// A knowledge hit arrives as a single chunk. A failure before or during
    /// streaming ends the stream with one fallback chunk. The folded answer
    /// is recorded only when the stream runs to its end; dropping the stream
    /// early aborts the upstream request and records nothing.
    pub fn resolve_stream(&self, question: Question, snippets: Vec<String>) -> BoxStream<'static, String> {
        let state = StreamState::Start {
            engine: self.clone(),
            question,
            snippets,
        };
        stream::unfold(state, StreamState::advance).boxed()
    }

    async fn try_resolve(&self, question: &Question, history: &[ConversationTurn]) -> Result<Resolution> {
        if history.is_empty() {
            return self.single_turn(question, &[]).await;
        }

        if let Some(cached) = self.cache.peek(&question.content) {
            debug!("Answered from cache");
            return Ok(Resolution::new(cached.readdressed(question), AnswerSource::Cache));
        }

        if let Some(entry) = self.lookup_knowledge(&question.content).await {
            debug!("Answered from knowledge");
            return Ok(Resolution::new(
                Answer::new(entry.answer, question.content.clone(), question.user_id),
                AnswerSource::Knowledge,
            ));
        }

        if !self.classifier.needs_context(&question.content, history) {
            debug!("Question stands alone, ignoring history");
            return self.single_turn(question, &[]).await;
        }

        let messages = multi_turn_messages(&question.content, history, self.max_history_turns);
        debug!(messages = messages.len(), "Answering with conversation context");
        let text = self.completion.complete(messages).await?;
        Ok(Resolution::new(
            Answer::new(text, question.content.clone(), question.user_id),
            AnswerSource::Model,
        ))
    }

    async fn single_turn(&self, question: &Question, snippets: &[String]) -> Result<Resolution> {
        let mut source = AnswerSource::Cache;
        let computed_source = &mut source;

        let answer = self
            .cache
            .get_or_compute(&question.content, move || async move {
                if let Some(entry) = self.lookup_knowledge(&question.content).await {
                    *computed_source = AnswerSource::Knowledge;
                    return Ok(Answer::new(entry.answer, question.content.clone(), question.user_id));
                }

                let messages = single_turn_messages(&question.content, snippets);
                let text = self.completion.complete(messages).await?;
                *computed_source = AnswerSource::Model;
                Ok(Answer::new(text, question.content.clone(), question.user_id))
            })
            .await?;

        Ok(Resolution::new(answer.readdressed(question), source))
    }

    /// Exact knowledge match; an unreachable knowledge service counts as a miss
    async fn lookup_knowledge(&self, question: &str) -> Option<KnowledgeEntry> {
        match self.knowledge.find_exact(question).await {
            Ok(entry) => entry.filter(|e| !e.answer.trim().is_empty()),
            Err(e) => {
                warn!(error = %e, "Knowledge lookup failed, treating as no match");
                None
            }
        }
    }

    fn settle(
        &self,
        question: &Question,
        outcome: Result<Resolution>,
        start: Instant,
        multi_turn: bool,
    ) -> Resolution {
        let resolution = outcome.unwrap_or_else(|e| {
            warn!(
                error = %e,
                transport = e.is_transport(),
                key = %normalize_key(&question.content),
                "Resolution failed, answering with fallback"
            );
            Resolution::new(fallback_answer(question, &e), AnswerSource::Fallback)
        });

        record_resolution(start.elapsed().as_secs_f64(), resolution.source.as_str(), multi_turn);
        info!(source = resolution.source.as_str(), "Question resolved");

        self.record_history(resolution.answer.clone());
        resolution
    }

    fn record_history(&self, answer: Answer) {
        let history = self.history.clone();
        tokio::spawn(async move {
            if let Err(e) = history.append(&answer).await {
                warn!(error = %e, user_id = answer.user_id, "Failed to record history");
                record_history_failure();
            }
        });
    }
}

/// Connect the Redis tier if configured; an unreachable or slow server only warns
async fn connect_shared_tier(config: &CacheConfig) -> Option<RedisAnswerTier> {
    let url = config.redis_url.as_deref()?;
    let timeout = config.redis_connect_timeout();

    let connect = RedisAnswerTier::connect(url, &config.key_prefix, config.redis_ttl_secs);
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(tier)) => {
            info!("Shared answer tier connected");
            Some(tier)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Shared answer tier unavailable, continuing without it");
            None
        }
        Err(_) => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "Shared answer tier connect timed out, continuing without it"
            );
            None
        }
    }
}

enum StreamState {
    Start {
        engine: ResolutionEngine,
        question: Question,
        snippets: Vec<String>,
    },
    Streaming {
        engine: ResolutionEngine,
        question: Question,
        upstream: CompletionStream,
        folded: String,
        start: Instant,
    },
    Finishing {
        engine: ResolutionEngine,
        answer: Answer,
        source: AnswerSource,
        start: Instant,
    },
    Done,
}

impl StreamState {
    async fn advance(self) -> Option<(String, StreamState)> {
        let mut state = self;
        loop {
            state = match state {
                StreamState::Start { engine, question, snippets } => {
                    let start = Instant::now();

                    if let Some(entry) = engine.lookup_knowledge(&question.content).await {
                        let chunk = entry.answer.clone();
                        let answer = Answer::new(entry.answer, question.content, question.user_id);
                        return Some((
                            chunk,
                            StreamState::Finishing { engine, answer, source: AnswerSource::Knowledge, start },
                        ));
                    }

                    let messages = single_turn_messages(&question.content, &snippets);
                    match engine.completion.stream_complete(messages).await {
                        Ok(upstream) => StreamState::Streaming {
                            engine,
                            question,
                            upstream,
                            folded: String::new(),
                            start,
                        },
                        Err(e) => return Some(StreamState::fail(&question, &e, start)),
                    }
                }
                StreamState::Streaming { engine, question, mut upstream, mut folded, start } => {
                    match upstream.next().await {
                        Some(Ok(chunk)) => {
                            folded.push_str(&chunk);
                            return Some((
                                chunk,
                                StreamState::Streaming { engine, question, upstream, folded, start },
                            ));
                        }
                        Some(Err(e)) => return Some(StreamState::fail(&question, &e, start)),
                        None => StreamState::Finishing {
                            engine,
                            answer: Answer::new(folded, question.content, question.user_id),
                            source: AnswerSource::Model,
                            start,
                        },
                    }
                }
                StreamState::Finishing { engine, answer, source, start } => {
                    record_resolution(start.elapsed().as_secs_f64(), source.as_str(), false);
                    if answer.answer.trim().is_empty() {
                        warn!(user_id = answer.user_id, "Completion stream produced no content");
                    } else {
                        engine.record_history(answer);
                    }
                    return None;
                }
                StreamState::Done => return None,
            };
        }
    }

    fn fail(question: &Question, error: &AppError, start: Instant) -> (String, StreamState) {
        warn!(error = %error, "Streaming resolution failed, sending fallback");
        record_resolution(start.elapsed().as_secs_f64(), AnswerSource::Fallback.as_str(), false);
        (fallback_text(&question.content, error), StreamState::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{MockBehavior, MockCompletionClient, MULTI_TURN_PERSONA};
    use crate::history::InMemoryHistory;
    use crate::knowledge::InMemoryKnowledge;
    use crate::models::Role;
    use std::time::Duration;

    struct Harness {
        engine: ResolutionEngine,
        completion: Arc<MockCompletionClient>,
        knowledge: Arc<InMemoryKnowledge>,
        history: Arc<InMemoryHistory>,
    }

    fn harness(completion: MockCompletionClient) -> Harness {
        let completion = Arc::new(completion);
        let knowledge = Arc::new(InMemoryKnowledge::new());
        let history = Arc::new(InMemoryHistory::new());
        let engine = ResolutionEngine::new(
            Arc::new(AnswerCache::new()),
            knowledge.clone(),
            completion.clone(),
            history.clone(),
        )
        .unwrap();
        Harness { engine, completion, knowledge, history }
    }

    async fn wait_for_records(history: &InMemoryHistory, count: usize) -> Vec<Answer> {
        for _ in 0..100 {
            let records = history.records().await;
            if records.len() >= count {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        history.records().await
    }

    fn conversation(turns: usize) -> Vec<ConversationTurn> {
        (0..turns)
            .map(|i| {
                if i % 2 == 0 {
                    ConversationTurn::user(format!("question {}", i))
                } else {
                    ConversationTurn::assistant(format!("answer {}", i))
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_hello_end_to_end() {
        let h = harness(MockCompletionClient::replying("Hi there"));
        let question = Question::new("Hello", 42);

        let first = h.engine.resolve_with_source(&question, &[]).await;
        assert_eq!(first.answer, Answer::new("Hi there", "Hello", 42));
        assert_eq!(first.source, AnswerSource::Model);

        let second = h.engine.resolve_with_source(&question, &[]).await;
        assert_eq!(second.answer, first.answer);
        assert_eq!(second.source, AnswerSource::Cache);
        assert_eq!(h.completion.calls(), 1);
    }

    #[tokio::test]
    async fn test_cached_answer_is_readdressed() {
        let h = harness(MockCompletionClient::replying("Hi there"));
        h.engine.resolve(&Question::new("Hello", 1), &[]).await;

        let answer = h.engine.resolve(&Question::new("  Hello ", 7), &[]).await;
        assert_eq!(answer.answer, "Hi there");
        assert_eq!(answer.question, "  Hello ");
        assert_eq!(answer.user_id, 7);
        assert_eq!(h.completion.calls(), 1);
    }

    #[tokio::test]
    async fn test_knowledge_takes_precedence() {
        let h = harness(MockCompletionClient::replying("from model"));
        h.knowledge.insert("What are your hours?", "9 to 5").await;

        let resolution = h
            .engine
            .resolve_with_source(&Question::new("What are your hours?", 1), &[])
            .await;
        assert_eq!(resolution.answer.answer, "9 to 5");
        assert_eq!(resolution.source, AnswerSource::Knowledge);
        assert_eq!(h.completion.calls(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_falls_back() {
        let h = harness(MockCompletionClient::failing("connection refused"));
        let question = Question::new("Hello", 3);

        let resolution = h.engine.resolve_with_source(&question, &[]).await;
        assert!(resolution.is_degraded());
        assert_eq!(resolution.answer.question, "Hello");
        assert_eq!(resolution.answer.user_id, 3);
        assert!(resolution.answer.answer.contains(FALLBACK_MARKER));
        assert!(resolution.answer.answer.contains("\"Hello\""));
        assert!(resolution.answer.answer.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_failures_are_retried() {
        let h = harness(MockCompletionClient::replying("Hi there"));
        h.completion.push(MockBehavior::FailTransport("timeout".to_string()));
        let question = Question::new("Hello", 1);

        assert!(h.engine.resolve_with_source(&question, &[]).await.is_degraded());
        assert!(h.engine.cache().peek("Hello").is_none());

        let retried = h.engine.resolve_with_source(&question, &[]).await;
        assert_eq!(retried.answer.answer, "Hi there");
        assert_eq!(h.completion.calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_completion_falls_back() {
        let h = harness(MockCompletionClient::new(MockBehavior::Empty));
        let answer = h.engine.resolve(&Question::new("Hello", 1), &[]).await;
        assert!(answer.answer.contains(FALLBACK_MARKER));
    }

    #[tokio::test]
    async fn test_knowledge_outage_is_a_miss() {
        let h = harness(MockCompletionClient::replying("from model"));
        h.knowledge.set_unavailable(true);

        let resolution = h.engine.resolve_with_source(&Question::new("Hello", 1), &[]).await;
        assert_eq!(resolution.source, AnswerSource::Model);
        assert_eq!(resolution.answer.answer, "from model");
    }

    #[tokio::test]
    async fn test_concurrent_resolutions_share_one_call() {
        let h = harness(MockCompletionClient::replying("A consensus algorithm").with_delay(Duration::from_millis(50)));

        let tasks: Vec<_> = (0..8)
            .map(|user_id| {
                let engine = h.engine.clone();
                tokio::spawn(async move { engine.resolve(&Question::new("What is Raft?", user_id), &[]).await })
            })
            .collect();

        for (user_id, task) in tasks.into_iter().enumerate() {
            let answer = task.await.unwrap();
            assert_eq!(answer.answer, "A consensus algorithm");
            assert_eq!(answer.user_id, user_id as i64);
        }
        assert_eq!(h.completion.calls(), 1);
    }

    #[tokio::test]
    async fn test_contextual_question_uses_history_and_is_not_cached() {
        let h = harness(MockCompletionClient::replying("It means 'it'."));
        let question = Question::new("它是什么意思", 1);

        let resolution = h.engine.resolve_with_source(&question, &conversation(2)).await;
        assert_eq!(resolution.source, AnswerSource::Model);

        let messages = h.completion.last_messages().unwrap();
        assert_eq!(messages[0].content, MULTI_TURN_PERSONA);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[3].role, Role::User);
        assert!(h.engine.cache().peek("它是什么意思").is_none());
    }

    #[tokio::test]
    async fn test_contextual_question_falls_back_on_transport_failure() {
        let h = harness(MockCompletionClient::failing("connection reset"));
        let question = Question::new("What does that mean?", 11);

        let resolution = h.engine.resolve_with_source(&question, &conversation(4)).await;

        assert!(resolution.is_degraded());
        assert_eq!(h.completion.calls(), 1);
        assert_eq!(resolution.answer.question, "What does that mean?");
        assert_eq!(resolution.answer.user_id, 11);
        assert!(!resolution.answer.answer.trim().is_empty());
        assert!(resolution.answer.answer.contains(FALLBACK_MARKER));
        assert!(resolution.answer.answer.contains("connection reset"));
        assert!(h.engine.cache().is_empty());

        let records = wait_for_records(&h.history, 1).await;
        assert_eq!(records[0], resolution.answer);
    }

    #[tokio::test]
    async fn test_history_is_truncated_to_last_ten_turns() {
        let h = harness(MockCompletionClient::replying("ok"));
        h.engine
            .resolve(&Question::new("what about that?", 1), &conversation(15))
            .await;

        let messages = h.completion.last_messages().unwrap();
        assert_eq!(messages.len(), 12);
        assert_eq!(messages[1].content, "answer 5");
        assert_eq!(messages[10].content, "question 14");
        assert_eq!(messages[11].content, "what about that?");
    }

    #[tokio::test]
    async fn test_cached_question_short_circuits_multi_turn() {
        let h = harness(MockCompletionClient::replying("A consensus algorithm"));
        h.engine.resolve(&Question::new("What is Raft?", 1), &[]).await;

        let resolution = h
            .engine
            .resolve_with_source(&Question::new("What is Raft?", 2), &conversation(4))
            .await;
        assert_eq!(resolution.source, AnswerSource::Cache);
        assert_eq!(resolution.answer.user_id, 2);
        assert_eq!(h.completion.calls(), 1);
    }

    #[tokio::test]
    async fn test_standalone_question_with_history_is_cached() {
        let h = harness(MockCompletionClient::replying("Paris"));
        let question = Question::new("Name the capital city of France please", 1);

        let resolution = h.engine.resolve_with_source(&question, &conversation(2)).await;
        assert_eq!(resolution.source, AnswerSource::Model);
        assert_eq!(h.completion.last_messages().unwrap().len(), 2);
        assert!(h.engine.cache().peek(&question.content).is_some());
    }

    #[tokio::test]
    async fn test_snippets_extend_system_prompt() {
        let h = harness(MockCompletionClient::replying("Three days."));
        let snippets = vec!["Refunds take 3 days.".to_string()];

        h.engine
            .resolve_single_turn(&Question::new("How long do refunds take?", 1), &snippets)
            .await;

        let messages = h.completion.last_messages().unwrap();
        assert!(messages[0].content.contains("Refunds take 3 days.\n"));
    }

    #[tokio::test]
    async fn test_answers_are_recorded_in_history() {
        let h = harness(MockCompletionClient::replying("Hi there"));
        h.engine.resolve(&Question::new("Hello", 42), &[]).await;

        let records = wait_for_records(&h.history, 1).await;
        assert_eq!(records, vec![Answer::new("Hi there", "Hello", 42)]);
    }

    #[tokio::test]
    async fn test_history_outage_does_not_change_answer() {
        let h = harness(MockCompletionClient::replying("Hi there"));
        h.history.set_unavailable(true);

        let answer = h.engine.resolve(&Question::new("Hello", 42), &[]).await;
        assert_eq!(answer, Answer::new("Hi there", "Hello", 42));
    }

    #[tokio::test]
    async fn test_stream_yields_chunks_and_records_folded_answer() {
        let h = harness(MockCompletionClient::streaming(["Hi", " there"]));

        let chunks: Vec<String> = h
            .engine
            .resolve_stream(Question::new("Hello", 5), Vec::new())
            .collect()
            .await;
        assert_eq!(chunks, vec!["Hi".to_string(), " there".to_string()]);

        let records = wait_for_records(&h.history, 1).await;
        assert_eq!(records, vec![Answer::new("Hi there", "Hello", 5)]);
    }

    #[tokio::test]
    async fn test_stream_knowledge_hit_is_one_chunk() {
        let h = harness(MockCompletionClient::streaming(["unused"]));
        h.knowledge.insert("Hello", "Welcome!").await;

        let chunks: Vec<String> = h
            .engine
            .resolve_stream(Question::new("Hello", 5), Vec::new())
            .collect()
            .await;
        assert_eq!(chunks, vec!["Welcome!".to_string()]);
        assert_eq!(h.completion.calls(), 0);
    }

    #[tokio::test]
    async fn test_stream_failure_ends_with_fallback() {
        let h = harness(MockCompletionClient::new(MockBehavior::StreamThenFail(vec!["Hi".to_string()])));

        let chunks: Vec<String> = h
            .engine
            .resolve_stream(Question::new("Hello", 5), Vec::new())
            .collect()
            .await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "Hi");
        assert!(chunks[1].contains(FALLBACK_MARKER));
    }

    #[tokio::test]
    async fn test_stream_open_failure_is_single_fallback_chunk() {
        let h = harness(MockCompletionClient::failing("connection refused"));

        let chunks: Vec<String> = h
            .engine
            .resolve_stream(Question::new("Hello", 5), Vec::new())
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("connection refused"));
    }

    #[tokio::test]
    async fn test_abandoned_stream_records_nothing() {
        let h = harness(MockCompletionClient::streaming(["Hi", " there"]));

        let mut stream = h.engine.resolve_stream(Question::new("Hello", 5), Vec::new());
        assert_eq!(stream.next().await.unwrap(), "Hi");
        drop(stream);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.history.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_provider_stream_records_nothing() {
        use crate::completion::OpenAiCompletionClient;
        use crate::config::CompletionConfig;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let body: String = ["one", "two", "three"]
            .iter()
            .map(|text| format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"{}\"}}}}]}}\n\n", text))
            .chain(std::iter::once("data: [DONE]\n\n".to_string()))
            .collect();
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .expect(1)
            .mount(&server)
            .await;

        let completion = OpenAiCompletionClient::new(CompletionConfig {
            base_url: server.uri(),
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        })
        .unwrap();
        let history = Arc::new(InMemoryHistory::new());
        let engine = ResolutionEngine::new(
            Arc::new(AnswerCache::new()),
            Arc::new(InMemoryKnowledge::new()),
            Arc::new(completion),
            history.clone(),
        )
        .unwrap();

        let mut stream = engine.resolve_stream(Question::new("Hello", 5), Vec::new());
        assert_eq!(stream.next().await.unwrap(), "one");
        drop(stream);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(history.records().await.is_empty());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shared_tier_is_optional() {
        assert!(connect_shared_tier(&CacheConfig::default()).await.is_none());
    }

    #[tokio::test]
    async fn test_shared_tier_connect_is_bounded() {
        let config = CacheConfig {
            redis_url: Some("redis://10.255.255.1:6379".to_string()),
            redis_connect_timeout_secs: 1,
            ..Default::default()
        };

        let start = Instant::now();
        assert!(connect_shared_tier(&config).await.is_none());
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
