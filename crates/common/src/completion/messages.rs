//! Message sequence builders for single-turn and multi-turn questions

use super::ChatMessage;
use crate::models::ConversationTurn;

/// System persona for stand-alone questions
pub const SINGLE_TURN_PERSONA: &str = "You are a helpful AI customer service assistant.";

/// System persona for questions answered against prior turns
pub const MULTI_TURN_PERSONA: &str = "You are a helpful AI customer service assistant. \
Please provide helpful and accurate responses based on the conversation history and the current question.";

const SNIPPET_PREAMBLE: &str = " Use the following information to answer the question: \n";

/// System message (extended with knowledge snippets) followed by the question
pub fn single_turn_messages(question: &str, snippets: &[String]) -> Vec<ChatMessage> {
    let mut system = String::from(SINGLE_TURN_PERSONA);
    if !snippets.is_empty() {
        system.push_str(SNIPPET_PREAMBLE);
        for snippet in snippets {
            system.push_str(snippet);
            system.push('\n');
        }
    }

    vec![ChatMessage::system(system), ChatMessage::user(question)]
}

/// System message, the last `max_turns` usable history turns, then the question
///
/// The window is taken over the raw history first; turns without a role or
/// with blank content are dropped afterwards.
pub fn multi_turn_messages(
    question: &str,
    history: &[ConversationTurn],
    max_turns: usize,
) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(max_turns);
    let window = &history[start..];

    let mut messages = Vec::with_capacity(window.len() + 2);
    messages.push(ChatMessage::system(MULTI_TURN_PERSONA));

    for turn in window {
        let content = turn.content.trim();
        match turn.role {
            Some(role) if !content.is_empty() => messages.push(ChatMessage {
                role,
                content: content.to_string(),
            }),
            _ => {}
        }
    }

    messages.push(ChatMessage::user(question));
    messages
}
