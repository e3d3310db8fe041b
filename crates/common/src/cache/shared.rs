//! Redis-backed shared answer tier
//!
//! Answers are stored as JSON under hashed keys with a fixed TTL so that
//! several gateway instances can reuse each other's completions.

use super::AnswerTier;
use crate::errors::{AppError, Result};
use crate::models::Answer;
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use tracing::debug;

/// Redis answer tier
///
/// The multiplexed connection is cloned per command; clones share one socket.
#[derive(Clone)]
pub struct RedisAnswerTier {
    connection: MultiplexedConnection,
    key_prefix: String,
    ttl_secs: u64,
}

impl RedisAnswerTier {
    /// Connect to Redis at `url`
    pub async fn connect(url: &str, key_prefix: &str, ttl_secs: u64) -> Result<Self> {
        let client = Client::open(url).map_err(|e| AppError::CacheError {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection,
            key_prefix: key_prefix.to_string(),
            ttl_secs,
        })
    }
}

#[async_trait]
impl AnswerTier for RedisAnswerTier {
    async fn get(&self, key: &str) -> Result<Option<Answer>> {
        let full_key = keys::answer(&self.key_prefix, key);
        let mut conn = self.connection.clone();

        let value: Option<String> = conn.get(&full_key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to get key '{}': {}", full_key, e),
        })?;

        match value {
            Some(json) => {
                let answer = serde_json::from_str(&json).map_err(|e| AppError::CacheError {
                    message: format!("Failed to parse cached answer: {}", e),
                })?;
                debug!(key = %full_key, "Shared tier hit");
                Ok(Some(answer))
            }
            None => {
                debug!(key = %full_key, "Shared tier miss");
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, answer: &Answer) -> Result<()> {
        let full_key = keys::answer(&self.key_prefix, key);
        let json = serde_json::to_string(answer)?;
        let mut conn = self.connection.clone();

        conn.set_ex::<_, _, ()>(&full_key, json, self.ttl_secs)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to set key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, ttl_secs = self.ttl_secs, "Shared tier set");
        Ok(())
    }
}

/// Cache key builder helpers
pub mod keys {
    use sha2::{Digest, Sha256};

    /// Build the shared-tier key for a normalized question
    pub fn answer(prefix: &str, question: &str) -> String {
        let digest = Sha256::digest(question.as_bytes());
        format!("{}:answer:{}", prefix, hex::encode(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_key_is_hashed_and_prefixed() {
        let key = keys::answer("qaforge", "Hello");
        assert!(key.starts_with("qaforge:answer:"));
        assert_eq!(key.len(), "qaforge:answer:".len() + 64);
        assert!(!key.contains("Hello"));
    }

    #[test]
    fn test_answer_keys_are_case_sensitive() {
        assert_ne!(keys::answer("qaforge", "Hello"), keys::answer("qaforge", "hello"));
        assert_eq!(keys::answer("qaforge", "Hello"), keys::answer("qaforge", "Hello"));
    }

    #[tokio::test]
    async fn test_unreachable_redis_is_cache_error() {
        let result = RedisAnswerTier::connect("redis://127.0.0.1:1", "qaforge", 60).await;
        assert!(matches!(result, Err(AppError::CacheError { .. })));
    }
}
