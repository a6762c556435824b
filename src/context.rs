use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::datetime_utils::{Clock, SystemClock};
use crate::dedup::DedupTracker;
use crate::poller::PollResult;
use crate::quota::QuotaManager;

/// Async locks handed out per key (author id, post id).
///
/// Entries nobody holds or waits on are pruned on the next acquisition, so
/// the map only grows with the number of keys in use at the same time.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Keys currently held or awaited (plus any not yet pruned)
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide statistics
#[derive(Clone, Debug)]
pub struct BotStats {
    pub start_time: Instant,
    pub cycles: u64,
    pub total_polls: u64,
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub posts_fetched: u64,
    pub posts_filtered: u64,
    pub replies_sent: u64,
    pub replies_failed: u64,
    pub skipped_seen: u64,
    pub skipped_quota: u64,
    pub skipped_unresolved: u64,
}

impl Default for BotStats {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            cycles: 0,
            total_polls: 0,
            successful_polls: 0,
            failed_polls: 0,
            posts_fetched: 0,
            posts_filtered: 0,
            replies_sent: 0,
            replies_failed: 0,
            skipped_seen: 0,
            skipped_quota: 0,
            skipped_unresolved: 0,
        }
    }
}

impl BotStats {
    pub fn record_poll(&mut self, result: &PollResult) {
        self.total_polls += 1;
        self.successful_polls += 1;
        self.posts_fetched += result.fetched as u64;
        self.posts_filtered += result.filtered as u64;
        self.replies_sent += result.replied as u64;
        self.replies_failed += result.failed as u64;
        self.skipped_seen += result.skipped_seen as u64;
        self.skipped_quota += result.skipped_quota as u64;
        self.skipped_unresolved += result.skipped_unresolved as u64;
    }

    pub fn record_failed_poll(&mut self) {
        self.total_polls += 1;
        self.failed_polls += 1;
    }
}

/// State shared by every poller of one scheduler.
///
/// Owned by the scheduler and handed to pollers behind an `Arc`; nothing in
/// here is global.
pub struct BotContext {
    pub quota: Mutex<QuotaManager>,
    pub dedup: Mutex<DedupTracker>,
    /// Held from the quota check until the reply is recorded
    pub author_locks: KeyedLocks,
    /// Held from the dedup check until the post is marked seen
    pub post_locks: KeyedLocks,
    pub clock: Arc<dyn Clock>,
    pub stats: RwLock<BotStats>,
}

impl BotContext {
    pub fn new(quota: QuotaManager, dedup: DedupTracker) -> Self {
        Self {
            quota: Mutex::new(quota),
            dedup: Mutex::new(dedup),
            author_locks: KeyedLocks::default(),
            post_locks: KeyedLocks::default(),
            clock: Arc::new(SystemClock),
            stats: RwLock::new(BotStats::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_keyed_lock_serializes_same_key() {
        let locks = Arc::new(KeyedLocks::default());
        let guard = locks.lock("alice").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("alice").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // Different keys do not block each other
        let _other = tokio::time::timeout(Duration::from_secs(1), locks.lock("bob"))
            .await
            .expect("independent key should lock immediately");

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender should acquire after release")
            .unwrap();
    }

    #[tokio::test]
    async fn test_keyed_locks_are_pruned() {
        let locks = KeyedLocks::default();
        for id in 0..100 {
            let _guard = locks.lock(&format!("post-{id}")).await;
        }
        // Only the most recently released key can still be present
        assert!(locks.len() <= 1);
        let _held = locks.lock("held").await;
        let _again = locks.lock("other").await;
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_stats_record_poll() {
        let mut stats = BotStats::default();
        stats.record_poll(&PollResult {
            fetched: 5,
            filtered: 2,
            replied: 1,
            failed: 1,
            skipped_seen: 1,
            skipped_quota: 0,
            ..Default::default()
        });
        stats.record_failed_poll();

        assert_eq!(stats.total_polls, 2);
        assert_eq!(stats.successful_polls, 1);
        assert_eq!(stats.failed_polls, 1);
        assert_eq!(stats.posts_fetched, 5);
        assert_eq!(stats.replies_sent, 1);
    }
}
