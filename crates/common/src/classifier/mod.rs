//! Context classifier
//!
//! Decides whether a question only makes sense against the prior turns of a
//! conversation. The heuristic is deliberately small: demonstratives and
//! pronouns, very short questions, and bare interrogatives.

use crate::errors::{AppError, Result};
use crate::models::ConversationTurn;
use regex_lite::Regex;

/// Pronouns and demonstratives matched anywhere in the text
const CJK_ANAPHORA: &[&str] = &[
    "它", "这个", "那个", "他", "她", "这", "那", "上面", "前面", "刚才", "之前",
];

/// Pronouns and demonstratives matched as whole words
const LATIN_ANAPHORA: &[&str] = &["this", "that", "it", "above", "previous", "earlier", "what", "which"];

const CJK_INTERROGATIVES: &[&str] = &["什么", "怎么", "如何", "为什么"];

const LATIN_INTERROGATIVES: &[&str] = &["when", "how", "why", "what"];

/// Questions shorter than this (in characters) lean on the conversation
pub const SHORT_QUESTION_CHARS: usize = 10;

/// Compiled context heuristic
#[derive(Debug, Clone)]
pub struct ContextClassifier {
    anaphora: Regex,
    interrogatives: Regex,
}

impl ContextClassifier {
    pub fn new() -> Result<Self> {
        Ok(Self {
            anaphora: word_pattern(LATIN_ANAPHORA)?,
            interrogatives: word_pattern(LATIN_INTERROGATIVES)?,
        })
    }

    /// True when the question should be answered with the history attached
    pub fn needs_context(&self, question: &str, history: &[ConversationTurn]) -> bool {
        if history.is_empty() {
            return false;
        }

        let text = question.trim().to_lowercase();

        if CJK_ANAPHORA.iter().any(|marker| text.contains(marker)) || self.anaphora.is_match(&text) {
            return true;
        }

        if text.chars().count() < SHORT_QUESTION_CHARS {
            return true;
        }

        let interrogative = text.ends_with('?') || text.ends_with('？');
        interrogative
            && (CJK_INTERROGATIVES.iter().any(|marker| text.contains(marker))
                || self.interrogatives.is_match(&text))
    }
}

fn word_pattern(words: &[&str]) -> Result<Regex> {
    let pattern = format!(r"\b(?:{})\b", words.join("|"));
    Regex::new(&pattern).map_err(|e| AppError::Configuration {
        message: format!("Invalid classifier pattern '{}': {}", pattern, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::user("Tell me about Raft"),
            ConversationTurn::assistant("Raft is a consensus algorithm."),
        ]
    }

    fn classifier() -> ContextClassifier {
        ContextClassifier::new().unwrap()
    }

    #[test]
    fn test_cjk_pronoun_needs_context() {
        assert!(classifier().needs_context("它是什么意思", &history()));
    }

    #[test]
    fn test_long_standalone_question() {
        assert!(!classifier().needs_context(
            "Explain the full architecture of distributed consensus protocols in detail",
            &history()
        ));
    }

    #[test]
    fn test_short_bare_question() {
        assert!(classifier().needs_context("what?", &history()));
    }

    #[test]
    fn test_empty_history_never_needs_context() {
        let classifier = classifier();
        assert!(!classifier.needs_context("它是什么意思", &[]));
        assert!(!classifier.needs_context("what?", &[]));
    }

    #[test]
    fn test_latin_markers_are_whole_words() {
        let classifier = classifier();
        // "architecture" contains "it", "thathas" is not "that"
        assert!(!classifier.needs_context("Describe the architecture of thathas systems", &history()));
        assert!(classifier.needs_context("Could you explain that one more time", &history()));
        assert!(classifier.needs_context("Is IT supported on the enterprise plan", &history()));
    }

    #[test]
    fn test_short_question_without_markers() {
        assert!(classifier().needs_context("Go on", &history()));
        assert!(classifier().needs_context("  继续说  ", &history()));
    }

    #[test]
    fn test_interrogative_requires_question_mark() {
        let classifier = classifier();
        assert!(classifier.needs_context("How does leader election work in Raft?", &history()));
        assert!(classifier.needs_context("领导者选举在Raft里面怎么工作？", &history()));
        assert!(!classifier.needs_context("How does leader election work in Raft", &history()));
    }
}
