//! Answer cache with single-flight de-duplication
//!
//! Provides:
//! - Memoization of single-turn answers keyed by trimmed question text
//! - One in-flight computation per key; concurrent callers share its outcome
//! - Optional TTL on ready entries
//! - Optional shared tier (Redis) consulted before computing

mod shared;

pub use shared::{keys, RedisAnswerTier};

use crate::errors::{AppError, Result};
use crate::metrics::record_cache;
use crate::models::Answer;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

const LOCAL_CACHE: &str = "answer";
const SHARED_CACHE: &str = "shared";

/// A leader's outcome as replayed to waiters
type Outcome = std::result::Result<Answer, String>;

/// Second-level store shared between processes
#[async_trait]
pub trait AnswerTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Answer>>;

    async fn put(&self, key: &str, answer: &Answer) -> Result<()>;
}

enum Slot {
    Ready { answer: Answer, stored_at: Instant },
    Pending { flight: u64, outcome: watch::Receiver<Option<Outcome>> },
}

impl Slot {
    fn is_flight(&self, id: u64) -> bool {
        matches!(self, Slot::Pending { flight, .. } if *flight == id)
    }
}

enum Admission {
    Hit(Answer),
    Wait(watch::Receiver<Option<Outcome>>),
    Lead(u64, watch::Sender<Option<Outcome>>),
}

/// Process-wide answer memo, owned by the resolution engine
pub struct AnswerCache {
    entries: DashMap<String, Slot>,
    ttl: Option<Duration>,
    tier: Option<Arc<dyn AnswerTier>>,
    next_flight: AtomicU64,
}

/// Normalize a question into its cache key
pub fn normalize_key(question: &str) -> String {
    question.trim().to_string()
}

impl Default for AnswerCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AnswerCache {
    /// Unbounded cache without a shared tier
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            ttl: None,
            tier: None,
            next_flight: AtomicU64::new(0),
        }
    }

    /// Expire ready entries after `ttl`
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Consult `tier` on local misses and populate it after computing
    pub fn with_tier(mut self, tier: Arc<dyn AnswerTier>) -> Self {
        self.tier = Some(tier);
        self
    }

    /// Ready answer for `key`, without computing anything
    pub fn peek(&self, key: &str) -> Option<Answer> {
        let key = normalize_key(key);
        let found = self.entries.get(&key).and_then(|slot| match &*slot {
            Slot::Ready { answer, stored_at } if self.is_fresh(*stored_at) => Some(answer.clone()),
            _ => None,
        });
        record_cache(found.is_some(), LOCAL_CACHE);
        found
    }

    /// Number of ready entries
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Ready { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the memoized answer for `key`, computing it at most once
    ///
    /// Callers arriving while another caller computes the same key wait for
    /// that computation; a failure is replayed to each of them as
    /// [`AppError::CacheComputation`] and nothing is stored. If the computing
    /// caller is cancelled, one waiter takes over.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<Answer>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Answer>>,
    {
        let key = normalize_key(key);
        let mut compute = Some(compute);

        loop {
            match self.admit(&key) {
                Admission::Hit(answer) => {
                    record_cache(true, LOCAL_CACHE);
                    return Ok(answer);
                }
                Admission::Wait(mut outcome) => {
                    debug!(key = %key, "Waiting for in-flight computation");
                    let replay = outcome
                        .wait_for(Option::is_some)
                        .await
                        .map(|value| (*value).clone());

                    match replay {
                        Ok(Some(Ok(answer))) => return Ok(answer),
                        Ok(Some(Err(message))) => {
                            return Err(AppError::CacheComputation { key, message })
                        }
                        // The computing caller went away; race for leadership again
                        Ok(None) | Err(_) => continue,
                    }
                }
                Admission::Lead(id, sender) => {
                    record_cache(false, LOCAL_CACHE);
                    let Some(compute) = compute.take() else {
                        return Err(AppError::Internal {
                            message: format!("Cache computation for '{}' already consumed", key),
                        });
                    };
                    let flight = Flight {
                        entries: &self.entries,
                        key: key.clone(),
                        id,
                        sender,
                        settled: false,
                    };
                    return self.lead(flight, compute).await;
                }
            }
        }
    }

    async fn lead<F, Fut>(&self, flight: Flight<'_>, compute: F) -> Result<Answer>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Answer>>,
    {
        if let Some(tier) = &self.tier {
            match tier.get(&flight.key).await {
                Ok(Some(answer)) => {
                    record_cache(true, SHARED_CACHE);
                    flight.succeed(answer.clone());
                    return Ok(answer);
                }
                Ok(None) => record_cache(false, SHARED_CACHE),
                Err(e) => warn!(key = %flight.key, error = %e, "Shared answer tier read failed"),
            }
        }

        match compute().await {
            Ok(answer) => {
                let key = flight.key.clone();
                flight.succeed(answer.clone());
                if let Some(tier) = &self.tier {
                    if let Err(e) = tier.put(&key, &answer).await {
                        warn!(key = %key, error = %e, "Shared answer tier write failed");
                    }
                }
                Ok(answer)
            }
            Err(e) => {
                debug!(key = %flight.key, error = %e, "Answer computation failed, evicting placeholder");
                flight.fail(e.to_string());
                Err(e)
            }
        }
    }

    fn admit(&self, key: &str) -> Admission {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let existing = match occupied.get() {
                    Slot::Ready { answer, stored_at } if self.is_fresh(*stored_at) => {
                        Some(Admission::Hit(answer.clone()))
                    }
                    Slot::Pending { outcome, .. } => Some(Admission::Wait(outcome.clone())),
                    Slot::Ready { .. } => None,
                };
                match existing {
                    Some(admission) => admission,
                    None => {
                        let (id, sender, slot) = self.open_flight();
                        occupied.insert(slot);
                        Admission::Lead(id, sender)
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let (id, sender, slot) = self.open_flight();
                vacant.insert(slot);
                Admission::Lead(id, sender)
            }
        }
    }

    fn open_flight(&self) -> (u64, watch::Sender<Option<Outcome>>, Slot) {
        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let (sender, outcome) = watch::channel(None);
        (id, sender, Slot::Pending { flight: id, outcome })
    }

    fn is_fresh(&self, stored_at: Instant) -> bool {
        self.ttl.map_or(true, |ttl| stored_at.elapsed() < ttl)
    }
}

/// The leader's claim on a pending slot; dropping it unsettled evicts the slot
struct Flight<'a> {
    entries: &'a DashMap<String, Slot>,
    key: String,
    id: u64,
    sender: watch::Sender<Option<Outcome>>,
    settled: bool,
}

impl Flight<'_> {
    fn succeed(mut self, answer: Answer) {
        self.entries.insert(
            self.key.clone(),
            Slot::Ready {
                answer: answer.clone(),
                stored_at: Instant::now(),
            },
        );
        self.settled = true;
        self.sender.send_replace(Some(Ok(answer)));
    }

    fn fail(mut self, message: String) {
        self.evict();
        self.settled = true;
        self.sender.send_replace(Some(Err(message)));
    }

    fn evict(&self) {
        let id = self.id;
        self.entries.remove_if(&self.key, |_, slot| slot.is_flight(id));
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(key = %self.key, "Answer computation abandoned");
            self.evict();
        }
    }
}
