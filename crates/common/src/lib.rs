//! QAForge Common Library
//!
//! Shared code for the QAForge services including:
//! - Answer resolution engine (cache, knowledge, model, fallback)
//! - Chat completion client abstraction with streaming
//! - Context classifier for multi-turn questions
//! - Single-flight answer cache with optional Redis tier
//! - Knowledge and history collaborator adapters
//! - Error types, configuration, metrics

pub mod cache;
pub mod classifier;
pub mod completion;
pub mod config;
pub mod errors;
pub mod history;
pub mod knowledge;
pub mod metrics;
pub mod models;
pub mod resolver;

// Re-export commonly used types
pub use cache::AnswerCache;
pub use completion::CompletionClient;
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use history::HistoryStore;
pub use knowledge::KnowledgeLookup;
pub use models::{Answer, ConversationTurn, Question, Role};
pub use resolver::{AnswerSource, Resolution, ResolutionEngine};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
