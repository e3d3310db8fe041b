//! Domain types shared by the resolution engine, its collaborators and the gateway

use serde::{Deserialize, Deserializer, Serialize};

/// An inbound question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub content: String,
    pub user_id: i64,
}

impl Question {
    pub fn new(content: impl Into<String>, user_id: i64) -> Self {
        Self {
            content: content.into(),
            user_id,
        }
    }
}

/// A resolved answer, addressed to the user who asked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub answer: String,
    pub question: String,
    pub user_id: i64,
}

impl Answer {
    pub fn new(answer: impl Into<String>, question: impl Into<String>, user_id: i64) -> Self {
        Self {
            answer: answer.into(),
            question: question.into(),
            user_id,
        }
    }

    /// Same answer text, addressed to another asker of the same question
    pub fn readdressed(&self, question: &Question) -> Self {
        Self {
            answer: self.answer.clone(),
            question: question.content.clone(),
            user_id: question.user_id,
        }
    }
}

/// Speaker of a conversation turn or chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// One prior exchange in a conversation, index 0 being the oldest
///
/// Clients send loosely shaped history; a missing or unknown role is kept as
/// `None` so the turn can be dropped when messages are built instead of
/// failing the whole request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    #[serde(default, deserialize_with = "lenient_role")]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role: Some(role),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

fn lenient_role<'de, D>(deserializer: D) -> Result<Option<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Role::parse))
}

/// A question/answer pair owned by the knowledge service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub question: String,
    pub answer: String,
}

/// Response envelope used by the QA service and its collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 200,
            message: "Success".to_string(),
            data: Some(data),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 200
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_wire_format() {
        let answer = Answer::new("Hi there", "Hello", 42);
        let json = serde_json::to_value(&answer).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"answer": "Hi there", "question": "Hello", "userId": 42})
        );
    }

    #[test]
    fn test_readdressed_keeps_text() {
        let cached = Answer::new("Paris", "  capital of France", 1);
        let asker = Question::new("capital of France", 7);
        let answer = cached.readdressed(&asker);
        assert_eq!(answer.answer, "Paris");
        assert_eq!(answer.question, "capital of France");
        assert_eq!(answer.user_id, 7);
    }

    #[test]
    fn test_turn_with_unknown_role_is_kept_without_role() {
        let turns: Vec<ConversationTurn> = serde_json::from_str(
            r#"[{"role": "user", "content": "hi"}, {"role": "narrator", "content": "x"}, {"content": "y"}]"#,
        )
        .unwrap();
        assert_eq!(turns[0].role, Some(Role::User));
        assert_eq!(turns[1].role, None);
        assert_eq!(turns[2].role, None);
    }

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success(vec!["snippet".to_string()]);
        assert!(response.is_success());
        assert_eq!(response.data.unwrap().len(), 1);
    }
}
