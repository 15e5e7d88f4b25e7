//! Token bucket rate limiting per connection

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::constants::{DEFAULT_BUCKET_LIMIT, DEFAULT_REFILL_INTERVAL_MS, DEFAULT_REFILL_RATE};
use crate::core::connection::ConnectionId;

/// Bucket parameters shared by every tracked connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    /// How often tokens are replenished
    pub refill_interval: Duration,
    /// Tokens added per refill
    pub refill_rate: u32,
    /// Maximum tokens a bucket can hold
    pub bucket_limit: u32,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            refill_interval: Duration::from_millis(DEFAULT_REFILL_INTERVAL_MS),
            refill_rate: DEFAULT_REFILL_RATE,
            bucket_limit: DEFAULT_BUCKET_LIMIT,
        }
    }
}

/// Advisory admission control for incoming messages.
///
/// `check` never blocks waiting for tokens; callers reject the message instead.
pub struct TokenBucketLimiter {
    buckets: Mutex<HashMap<ConnectionId, u32>>,
    config: BucketConfig,
}

impl TokenBucketLimiter {
    pub fn new(config: BucketConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> BucketConfig {
        self.config
    }

    /// Start tracking a connection with a full bucket
    pub async fn add(&self, connection: ConnectionId) {
        let mut buckets = self.buckets.lock().await;
        buckets.insert(connection, self.config.bucket_limit);
    }

    /// Take one token. Returns false for unknown connections or an empty bucket.
    pub async fn check(&self, connection: &ConnectionId) -> bool {
        let mut buckets = self.buckets.lock().await;
        match buckets.get_mut(connection) {
            Some(tokens) if *tokens > 0 => {
                *tokens -= 1;
                true
            }
            _ => false,
        }
    }

    /// Stop tracking a closed connection
    pub async fn remove(&self, connection: &ConnectionId) {
        let mut buckets = self.buckets.lock().await;
        buckets.remove(connection);
    }

    /// Tokens currently available to a connection
    pub async fn available(&self, connection: &ConnectionId) -> Option<u32> {
        let buckets = self.buckets.lock().await;
        buckets.get(connection).copied()
    }

    pub async fn tracked_connections(&self) -> usize {
        self.buckets.lock().await.len()
    }

    /// Add `refill_rate` tokens to every bucket, clamped to `bucket_limit`
    pub async fn refill(&self) {
        let mut buckets = self.buckets.lock().await;
        for tokens in buckets.values_mut() {
            *tokens = tokens
                .saturating_add(self.config.refill_rate)
                .min(self.config.bucket_limit);
        }
    }

    /// Start the periodic refill task
    pub fn start_refill_task(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.refill_interval);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                self.refill().await;
                log::trace!("Refilled token buckets");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn limiter(limit: u32, rate: u32) -> TokenBucketLimiter {
        TokenBucketLimiter::new(BucketConfig {
            refill_interval: Duration::from_millis(20),
            refill_rate: rate,
            bucket_limit: limit,
        })
    }

    #[tokio::test]
    async fn test_bucket_starts_full_and_drains() {
        let limiter = limiter(3, 1);
        let id = Uuid::new_v4();
        limiter.add(id).await;

        assert!(limiter.check(&id).await);
        assert!(limiter.check(&id).await);
        assert!(limiter.check(&id).await);
        assert!(!limiter.check(&id).await);
        assert_eq!(limiter.available(&id).await, Some(0));
    }

    #[tokio::test]
    async fn test_refill_is_clamped() {
        let limiter = limiter(5, 4);
        let id = Uuid::new_v4();
        limiter.add(id).await;
        assert!(limiter.check(&id).await);

        limiter.refill().await;
        assert_eq!(limiter.available(&id).await, Some(5));
    }

    #[tokio::test]
    async fn test_unknown_and_removed_connections_are_denied() {
        let limiter = limiter(5, 1);
        let id = Uuid::new_v4();
        assert!(!limiter.check(&id).await);

        limiter.add(id).await;
        limiter.remove(&id).await;
        assert!(!limiter.check(&id).await);
        limiter.refill().await;
        assert!(!limiter.check(&id).await);
        assert_eq!(limiter.tracked_connections().await, 0);
    }
}
