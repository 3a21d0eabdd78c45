//! Idempotency index: TTL-bound `(sender, idempotency_key)
//! -> response` map with atomic insert-or-return-existing semantics.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::cache::Cache;
use crate::identifiers::IdempotencyKey;
use crate::time_provider::SharedTimeProvider;

/// Default idempotency index retention: 168 hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(168 * 60 * 60);

#[derive(Clone)]
enum Slot<R> {
    /// A send is in flight; late arrivals await the winner's outcome.
    Pending(Arc<broadcast::Sender<R>>),
    /// A send has completed; its response is cached verbatim.
    Settled(R),
}

/// The outcome of an idempotency check.
pub enum IdempotencyOutcome<R> {
    /// This caller won the race and must now produce the canonical
    /// response, then call `settle`.
    Winner,
    /// Another caller already settled this key; here is the response.
    Existing(R),
}

/// TTL-bound idempotency index keyed by `(sender, idempotency_key)`.
pub struct IdempotencyIndex<R: Clone + Send + Sync + 'static> {
    cache: Cache<(String, IdempotencyKey), Slot<R>>,
    ttl: Duration,
}

impl<R: Clone + Send + Sync + 'static> IdempotencyIndex<R> {
    #[must_use]
    pub fn new(ttl: Duration, time: SharedTimeProvider) -> Self {
        Self {
            cache: Cache::new(1_000_000, ttl, time),
            ttl,
        }
    }

    /// Atomically checks the index: the first caller for a key becomes the
    /// `Winner` and must later call `settle`; subsequent concurrent callers
    /// wait for and receive the winner's eventual response.
    pub async fn check_or_wait(&self, sender: &str, key: IdempotencyKey) -> IdempotencyOutcome<R> {
        let cache_key = (sender.to_string(), key);

        if let Some(slot) = self.cache.get(&cache_key) {
            return match slot {
                Slot::Settled(response) => IdempotencyOutcome::Existing(response),
                Slot::Pending(sender_handle) => {
                    let mut receiver = sender_handle.subscribe();
                    match receiver.recv().await {
                        Ok(response) => IdempotencyOutcome::Existing(response),
                        Err(_) => IdempotencyOutcome::Winner,
                    }
                }
            };
        }

        let (tx, _rx) = broadcast::channel(1);
        let tx = Arc::new(tx);
        // Only the true first insert should win; DashMap's entry API inside
        // Cache::set always overwrites, so re-check after a single-flight guard.
        let _guard = self.cache.single_flight_guard().await;
        if let Some(slot) = self.cache.get(&cache_key) {
            return match slot {
                Slot::Settled(response) => IdempotencyOutcome::Existing(response),
                Slot::Pending(sender_handle) => {
                    let mut receiver = sender_handle.subscribe();
                    match receiver.recv().await {
                        Ok(response) => IdempotencyOutcome::Existing(response),
                        Err(_) => IdempotencyOutcome::Winner,
                    }
                }
            };
        }
        self.cache.set(cache_key, Slot::Pending(tx), Some(self.ttl));
        IdempotencyOutcome::Winner
    }

    /// Called by the winner once the canonical response is computed:
    /// records it and wakes any waiters.
    pub fn settle(&self, sender: &str, key: IdempotencyKey, response: R) {
        let cache_key = (sender.to_string(), key);
        if let Some(Slot::Pending(tx)) = self.cache.get(&cache_key) {
            let _ = tx.send(response.clone());
        }
        self.cache.set(cache_key, Slot::Settled(response), Some(self.ttl));
    }

    pub fn sweep_expired(&self) {
        self.cache.sweep_expired();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_provider::test_time_provider;

    #[tokio::test]
    async fn first_caller_wins_second_gets_settled_response() {
        let index: IdempotencyIndex<String> =
            IdempotencyIndex::new(Duration::from_secs(60), test_time_provider());
        let key = IdempotencyKey::generate();

        let outcome = index.check_or_wait("a@example.com", key).await;
        assert!(matches!(outcome, IdempotencyOutcome::Winner));
        index.settle("a@example.com", key, "response-1".to_string());

        let outcome = index.check_or_wait("a@example.com", key).await;
        match outcome {
            IdempotencyOutcome::Existing(response) => assert_eq!(response, "response-1"),
            IdempotencyOutcome::Winner => panic!("expected existing response"),
        }
    }

    #[tokio::test]
    async fn different_senders_with_same_key_are_independent() {
        let index: IdempotencyIndex<String> =
            IdempotencyIndex::new(Duration::from_secs(60), test_time_provider());
        let key = IdempotencyKey::generate();
        assert!(matches!(
            index.check_or_wait("a@example.com", key).await,
            IdempotencyOutcome::Winner
        ));
        assert!(matches!(
            index.check_or_wait("b@example.com", key).await,
            IdempotencyOutcome::Winner
        ));
    }
}
