//! History store abstraction
//!
//! Every resolved exchange is recorded best-effort. The engine never waits
//! on these writes and never lets their failures reach the caller.

mod http;

pub use http::HttpHistoryClient;

use crate::config::CollaboratorConfig;
use crate::errors::{AppError, Result};
use crate::models::Answer;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Trait for append-only exchange logs
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, answer: &Answer) -> Result<()>;
}

/// In-process history log for tests and local runs
#[derive(Default)]
pub struct InMemoryHistory {
    records: RwLock<Vec<Answer>>,
    unavailable: AtomicBool,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far, oldest first
    pub async fn records(&self) -> Vec<Answer> {
        self.records.read().await.clone()
    }

    /// Make every append fail as if the service were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn append(&self, answer: &Answer) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::collaborator("history", "service unavailable"));
        }
        self.records.write().await.push(answer.clone());
        Ok(())
    }
}

/// Create a history store based on configuration
pub fn create_history_store(config: &CollaboratorConfig) -> Result<Arc<dyn HistoryStore>> {
    match &config.history_url {
        Some(url) => Ok(Arc::new(HttpHistoryClient::new(url, config.timeout())?)),
        None => {
            tracing::warn!("No history service configured, recording exchanges in memory");
            Ok(Arc::new(InMemoryHistory::new()))
        }
    }
}
