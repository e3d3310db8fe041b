//! Knowledge lookup abstraction
//!
//! The knowledge service owns curated question/answer pairs. The engine only
//! reads from it: exact matches short-circuit the model, keyword search
//! supplies context snippets for the system prompt.

mod http;

pub use http::HttpKnowledgeClient;
pub(crate) use http::read_envelope;

use crate::config::CollaboratorConfig;
use crate::errors::{AppError, Result};
use crate::models::KnowledgeEntry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Trait for knowledge stores
#[async_trait]
pub trait KnowledgeLookup: Send + Sync {
    /// Entry whose question equals `question`; blank answers count as absent
    async fn find_exact(&self, question: &str) -> Result<Option<KnowledgeEntry>>;

    /// Snippets relevant to `query`, best first
    async fn search(&self, query: &str) -> Result<Vec<String>>;
}

/// In-process knowledge store for tests and local runs
#[derive(Default)]
pub struct InMemoryKnowledge {
    entries: RwLock<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl InMemoryKnowledge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<Q, A>(entries: impl IntoIterator<Item = (Q, A)>) -> Self
    where
        Q: Into<String>,
        A: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(q, a)| (q.into().trim().to_string(), a.into()))
            .collect();
        Self {
            entries: RwLock::new(entries),
            unavailable: AtomicBool::new(false),
        }
    }

    pub async fn insert(&self, question: impl Into<String>, answer: impl Into<String>) {
        self.entries
            .write()
            .await
            .insert(question.into().trim().to_string(), answer.into());
    }

    /// Make every call fail as if the service were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::collaborator("knowledge", "service unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl KnowledgeLookup for InMemoryKnowledge {
    async fn find_exact(&self, question: &str) -> Result<Option<KnowledgeEntry>> {
        self.check_available()?;
        let question = question.trim();
        let entries = self.entries.read().await;
        Ok(entries
            .get(question)
            .filter(|answer| !answer.trim().is_empty())
            .map(|answer| KnowledgeEntry {
                question: question.to_string(),
                answer: answer.clone(),
            }))
    }

    async fn search(&self, query: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().await;
        let mut matches: Vec<(&String, &String)> = entries
            .iter()
            .filter(|(question, answer)| {
                !answer.trim().is_empty()
                    && (question.to_lowercase().contains(&query)
                        || answer.to_lowercase().contains(&query))
            })
            .collect();
        matches.sort_by(|a, b| a.0.cmp(b.0));

        Ok(matches.into_iter().map(|(_, answer)| answer.clone()).collect())
    }
}

/// Create a knowledge lookup based on configuration
pub fn create_knowledge_lookup(config: &CollaboratorConfig) -> Result<Arc<dyn KnowledgeLookup>> {
    match &config.knowledge_url {
        Some(url) => Ok(Arc::new(HttpKnowledgeClient::new(url, config.timeout())?)),
        None => {
            tracing::warn!("No knowledge service configured, using empty in-memory store");
            Ok(Arc::new(InMemoryKnowledge::new()))
        }
    }
}
