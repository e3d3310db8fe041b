//! Question answering handlers

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream, StreamExt};
use qaforge_common::{
    errors::{AppError, Result},
    models::{Answer, ApiResponse, ConversationTurn, Question},
    KnowledgeLookup,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::{info, warn};
use validator::Validate;

use crate::AppState;

const DEFAULT_QUESTION: &str = "Hello";
const DEFAULT_USER_ID: i64 = 1;

/// Body of `/qa/ask` and `/qa/ask/stream`
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    #[validate(length(min = 1, max = 4000))]
    pub content: String,
    pub user_id: i64,
}

impl AskRequest {
    fn into_question(self) -> Result<Question> {
        self.validate().map_err(|e| AppError::Validation {
            message: e.to_string(),
            field: Some("content".to_string()),
        })?;
        if self.content.trim().is_empty() {
            return Err(AppError::Validation {
                message: "Question must not be blank".to_string(),
                field: Some("content".to_string()),
            });
        }
        Ok(Question::new(self.content, self.user_id))
    }
}

/// Body of `/qa/message`
///
/// Every field is optional on the wire; the user id may be a number or a
/// numeric string.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
    #[serde(default)]
    pub history: Option<Vec<ConversationTurn>>,
}

impl MessageRequest {
    fn question(&self) -> Question {
        let content = match self.question.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => q.to_string(),
            _ => DEFAULT_QUESTION.to_string(),
        };
        Question::new(content, parse_user_id(self.user_id.as_ref()))
    }
}

fn parse_user_id(value: Option<&serde_json::Value>) -> i64 {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(DEFAULT_USER_ID),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(DEFAULT_USER_ID),
        _ => DEFAULT_USER_ID,
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    pub success: bool,
}

/// Knowledge snippets for the prompt; a failed search just means no snippets
async fn snippets_for(knowledge: &dyn KnowledgeLookup, question: &str) -> Vec<String> {
    match knowledge.search(question).await {
        Ok(snippets) => snippets,
        Err(e) => {
            warn!(error = %e, "Knowledge search failed, answering without snippets");
            Vec::new()
        }
    }
}

/// Answer a stand-alone question
pub async fn ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<ApiResponse<Answer>>> {
    let question = request.into_question()?;
    let snippets = snippets_for(state.engine.knowledge().as_ref(), &question.content).await;

    let resolution = state.engine.resolve_single_turn(&question, &snippets).await;
    info!(
        user_id = question.user_id,
        source = resolution.source.as_str(),
        "Question answered"
    );

    Ok(Json(ApiResponse::success(resolution.answer)))
}

/// Answer a question within a conversation
pub async fn message(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> Json<MessageResponse> {
    let question = request.question();
    let history = request.history.unwrap_or_default();

    let resolution = state.engine.resolve_with_source(&question, &history).await;
    info!(
        user_id = question.user_id,
        turns = history.len(),
        source = resolution.source.as_str(),
        "Message answered"
    );

    Json(MessageResponse {
        message: resolution.answer.answer,
        success: true,
    })
}

/// Stream the answer to a stand-alone question as server-sent events
pub async fn ask_stream(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let question = request.into_question()?;
    let snippets = snippets_for(state.engine.knowledge().as_ref(), &question.content).await;

    let chunks = state
        .engine
        .resolve_stream(question, snippets)
        .map(|chunk| Ok::<_, Infallible>(Event::default().data(serde_json::json!({ "content": chunk }).to_string())));
    let done = stream::once(async { Ok::<_, Infallible>(Event::default().data("[DONE]")) });

    Ok(Sse::new(chunks.chain(done)).keep_alive(KeepAlive::default()))
}
