use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::BotContext;
use crate::datetime_utils::format_uptime;
use crate::poller::{FeedPoller, PollError, PollResult};
use crate::retry_policy::wait_or_cancel;

pub const DEFAULT_CYCLE_BUDGET: Duration = Duration::from_secs(90);
pub const DEFAULT_PAGE_BUDGET: u32 = 10;
pub const DEFAULT_MIN_PAGE_SIZE: u32 = 5;
pub const DEFAULT_MAX_PAGE_SIZE: u32 = 10;

const MAX_FEED_BACKOFF: Duration = Duration::from_secs(3600);
const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Chooses how many posts each feed fetches in a cycle
pub trait PageSizePolicy: Send + Sync {
    fn page_size(&self, feed_count: usize) -> u32;
}

/// Splits a fixed page budget across feeds, clamped to `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DividedBudget {
    pub budget: u32,
    pub min: u32,
    pub max: u32,
}

impl Default for DividedBudget {
    fn default() -> Self {
        Self {
            budget: DEFAULT_PAGE_BUDGET,
            min: DEFAULT_MIN_PAGE_SIZE,
            max: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

impl PageSizePolicy for DividedBudget {
    fn page_size(&self, feed_count: usize) -> u32 {
        let feeds = u32::try_from(feed_count.max(1)).unwrap_or(u32::MAX);
        (self.budget / feeds).min(self.max).max(self.min)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPageSize(pub u32);

impl PageSizePolicy for FixedPageSize {
    fn page_size(&self, _feed_count: usize) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    Active,
    /// Failed permanently; never polled again in this run
    Suspended { reason: String },
}

#[derive(Debug, Clone)]
pub struct FeedState {
    pub feed_id: String,
    pub status: FeedStatus,
    pub consecutive_failures: u32,
    pub last_poll: Option<Instant>,
    pub polls: u64,
    pub replies: u64,
}

impl FeedState {
    pub fn new(feed_id: String) -> Self {
        Self {
            feed_id,
            status: FeedStatus::Active,
            consecutive_failures: 0,
            last_poll: None,
            polls: 0,
            replies: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == FeedStatus::Active
    }

    /// Minimum time between two polls of this feed
    pub fn next_poll_delay(&self, base_interval: Duration) -> Duration {
        // Exponential backoff for failures
        if self.consecutive_failures > 0 {
            let backoff = base_interval.saturating_mul(2_u32.pow(self.consecutive_failures.min(5)));
            return backoff.min(MAX_FEED_BACKOFF);
        }

        Duration::ZERO
    }

    pub fn is_due(&self, now: Instant, base_interval: Duration) -> bool {
        if !self.is_active() {
            return false;
        }
        match self.last_poll {
            Some(last) => now.saturating_duration_since(last) >= self.next_poll_delay(base_interval),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    /// Sequential polling of the feed at `index` in configured order
    Polling { index: usize, feed_id: String },
    PollingConcurrently { feeds: usize },
    Sleeping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    AllFeedsSuspended,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub cycle_budget: Duration,
    pub pacing: CyclePacing,
    /// Poll the due feeds of a cycle concurrently instead of in order
    pub concurrent: bool,
}

/// How the pause after a cycle is measured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CyclePacing {
    /// Cycles start every `cycle_budget`; the pause is whatever the cycle left over
    #[default]
    Budget,
    /// Pause for the whole `cycle_budget` after each cycle
    Interval,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_budget: DEFAULT_CYCLE_BUDGET,
            pacing: CyclePacing::default(),
            concurrent: false,
        }
    }
}

/// Runs polling cycles over a set of feeds until cancelled
pub struct Scheduler {
    poller: Arc<FeedPoller>,
    feeds: Vec<FeedState>,
    page_size_policy: Box<dyn PageSizePolicy>,
    config: SchedulerConfig,
    cancel: CancellationToken,
    phase_tx: watch::Sender<SchedulerPhase>,
}

impl Scheduler {
    pub fn new(
        poller: Arc<FeedPoller>,
        feed_ids: Vec<String>,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (phase_tx, _) = watch::channel(SchedulerPhase::Idle);
        Self {
            poller,
            feeds: feed_ids.into_iter().map(FeedState::new).collect(),
            page_size_policy: Box::new(DividedBudget::default()),
            config,
            cancel,
            phase_tx,
        }
    }

    pub fn with_page_size_policy(mut self, policy: Box<dyn PageSizePolicy>) -> Self {
        self.page_size_policy = policy;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerPhase> {
        self.phase_tx.subscribe()
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase_tx.borrow().clone()
    }

    pub fn feeds(&self) -> &[FeedState] {
        &self.feeds
    }

    fn set_phase(&self, phase: SchedulerPhase) {
        debug!(?phase, "Scheduler phase changed");
        self.phase_tx.send_replace(phase);
    }

    pub async fn run(&mut self) -> StopReason {
        let budget = self.config.cycle_budget;
        info!(
            "Starting monitoring of {feed_count} lists with a {secs}s cycle",
            feed_count = self.feeds.len(),
            secs = budget.as_secs()
        );

        let reason = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            let active = self.feeds.iter().filter(|feed| feed.is_active()).count();
            if active == 0 {
                break StopReason::AllFeedsSuspended;
            }

            let cycle_start = Instant::now();
            let page_size = self.page_size_policy.page_size(active);
            let due: Vec<usize> = (0..self.feeds.len())
                .filter(|&i| self.feeds[i].is_due(cycle_start, budget))
                .collect();

            let cycle = {
                let mut stats = self.poller.context().stats.write().await;
                stats.cycles += 1;
                stats.cycles
            };
            info!(
                "Cycle {cycle} started: polling {due} of {active} active lists, {page_size} tweets each",
                due = due.len()
            );

            let cancelled = if self.config.concurrent {
                self.poll_concurrently(&due, page_size).await
            } else {
                self.poll_sequentially(&due, page_size).await
            };
            if cancelled {
                break StopReason::Cancelled;
            }

            let elapsed = cycle_start.elapsed();
            if self.feeds.iter().all(|feed| !feed.is_active()) {
                break StopReason::AllFeedsSuspended;
            }

            let sleep_time = match self.config.pacing {
                CyclePacing::Budget => budget.saturating_sub(elapsed),
                CyclePacing::Interval => budget,
            };
            info!(
                "Cycle {cycle} completed in {elapsed:.1}s, sleeping for {sleep:.1}s",
                elapsed = elapsed.as_secs_f64(),
                sleep = sleep_time.as_secs_f64()
            );
            if !sleep_time.is_zero() {
                self.set_phase(SchedulerPhase::Sleeping);
                if !wait_or_cancel(sleep_time, &self.cancel).await {
                    break StopReason::Cancelled;
                }
            }
        };

        match reason {
            StopReason::Cancelled => info!("Monitoring stopped by shutdown"),
            StopReason::AllFeedsSuspended => error!("All lists are suspended, stopping"),
        }
        self.set_phase(SchedulerPhase::Stopped);
        reason
    }

    /// Returns true when shutdown interrupted the cycle
    async fn poll_sequentially(&mut self, due: &[usize], page_size: u32) -> bool {
        for &index in due {
            if self.cancel.is_cancelled() {
                return true;
            }
            let feed_id = self.feeds[index].feed_id.clone();
            self.set_phase(SchedulerPhase::Polling {
                index,
                feed_id: feed_id.clone(),
            });

            let outcome = self.poller.poll_once(&feed_id, page_size).await;
            if self.apply_outcome(index, outcome).await {
                return true;
            }
        }
        false
    }

    async fn poll_concurrently(&mut self, due: &[usize], page_size: u32) -> bool {
        self.set_phase(SchedulerPhase::PollingConcurrently { feeds: due.len() });

        let poller = &self.poller;
        let polls = due.iter().map(|&index| {
            let feed_id = self.feeds[index].feed_id.clone();
            async move { (index, poller.poll_once(&feed_id, page_size).await) }
        });
        let outcomes = join_all(polls).await;

        let mut cancelled = false;
        for (index, outcome) in outcomes {
            cancelled |= self.apply_outcome(index, outcome).await;
        }
        cancelled
    }

    /// Updates feed state and statistics; returns true on cancellation
    async fn apply_outcome(
        &mut self,
        index: usize,
        outcome: Result<PollResult, PollError>,
    ) -> bool {
        let context = Arc::clone(self.poller.context());
        let feed = &mut self.feeds[index];
        feed.last_poll = Some(Instant::now());

        match outcome {
            Ok(result) => {
                feed.polls += 1;
                feed.replies += result.replied as u64;
                feed.consecutive_failures = 0;
                context.stats.write().await.record_poll(&result);
                false
            }
            Err(PollError::Cancelled) => true,
            Err(err @ PollError::Fatal { .. }) => {
                error!(
                    "Suspending list {feed_id}: {err}",
                    feed_id = feed.feed_id
                );
                feed.status = FeedStatus::Suspended {
                    reason: err.to_string(),
                };
                context.stats.write().await.record_failed_poll();
                false
            }
            Err(err) => {
                feed.consecutive_failures += 1;
                let feed_id = &feed.feed_id;
                let failures = feed.consecutive_failures;
                // Log different levels based on failure count
                match failures {
                    1..=2 => warn!(
                        "List {feed_id} failed {failures} times, will retry with backoff: {err}"
                    ),
                    3..=5 => error!(
                        "List {feed_id} failed {failures} times, increasing backoff delay: {err}"
                    ),
                    _ => error!(
                        "List {feed_id} failed {failures} times, may need manual intervention: {err}"
                    ),
                }
                context.stats.write().await.record_failed_poll();
                false
            }
        }
    }
}

pub fn spawn_stats_reporter(context: Arc<BotContext>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(STATS_INTERVAL);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;

            let stats = context.stats.read().await.clone();
            let tracked = context.dedup.lock().await.len();
            info!(
                "Stats | Uptime: {uptime} | Cycles: {cycles} | Polls: {total_polls} (ok {successful_polls}, failed {failed_polls}) | Replies: {replies_sent} | Tracked tweets: {tracked}",
                uptime = format_uptime(stats.start_time.elapsed()),
                cycles = stats.cycles,
                total_polls = stats.total_polls,
                successful_polls = stats.successful_polls,
                failed_polls = stats.failed_polls,
                replies_sent = stats.replies_sent
            );
        }
    })
}

pub async fn log_final_stats(context: &BotContext) {
    let stats = context.stats.read().await;
    let uptime = stats.start_time.elapsed();

    info!("=== Final Statistics ===");
    info!(
        "Uptime: {uptime:.2} hours",
        uptime = uptime.as_secs_f64() / 3600.0
    );
    info!("Cycles: {cycles}", cycles = stats.cycles);
    info!(
        "Polls: {total_polls} ({successful_polls} successful, {failed_polls} failed)",
        total_polls = stats.total_polls,
        successful_polls = stats.successful_polls,
        failed_polls = stats.failed_polls
    );
    info!(
        "Tweets fetched: {fetched}, filtered as reposts/replies: {filtered}",
        fetched = stats.posts_fetched,
        filtered = stats.posts_filtered
    );
    info!(
        "Replies sent: {sent}, failed: {failed}",
        sent = stats.replies_sent,
        failed = stats.replies_failed
    );
    info!(
        "Skipped: {seen} already processed, {quota} over daily limit, {unresolved} unresolved authors",
        seen = stats.skipped_seen,
        quota = stats.skipped_quota,
        unresolved = stats.skipped_unresolved
    );
    info!(
        "Authors with quota entries: {authors}",
        authors = context.quota.lock().await.tracked_authors()
    );
    info!("========================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_divided_budget_page_sizes() {
        let policy = DividedBudget::default();
        assert_eq!(policy.page_size(1), 10);
        assert_eq!(policy.page_size(2), 5);
        assert_eq!(policy.page_size(3), 5);
        assert_eq!(policy.page_size(20), 5);
        // No feeds behaves like one
        assert_eq!(policy.page_size(0), 10);
    }

    #[test]
    fn test_divided_budget_respects_max() {
        let policy = DividedBudget {
            budget: 100,
            min: 5,
            max: 20,
        };
        assert_eq!(policy.page_size(1), 20);
        assert_eq!(policy.page_size(10), 10);
    }

    #[test]
    fn test_fixed_page_size() {
        assert_eq!(FixedPageSize(5).page_size(1), 5);
        assert_eq!(FixedPageSize(5).page_size(7), 5);
    }

    #[test]
    fn test_next_poll_delay_backs_off() {
        let base = Duration::from_secs(90);
        let mut feed = FeedState::new("1".into());
        assert_eq!(feed.next_poll_delay(base), Duration::ZERO);

        feed.consecutive_failures = 1;
        assert_eq!(feed.next_poll_delay(base), Duration::from_secs(180));
        feed.consecutive_failures = 3;
        assert_eq!(feed.next_poll_delay(base), Duration::from_secs(720));
        // The exponent stops growing after five failures
        feed.consecutive_failures = 10;
        assert_eq!(feed.next_poll_delay(base), Duration::from_secs(2880));
    }

    #[test]
    fn test_next_poll_delay_capped_at_one_hour() {
        let mut feed = FeedState::new("1".into());
        feed.consecutive_failures = 10;
        assert_eq!(
            feed.next_poll_delay(Duration::from_secs(300)),
            Duration::from_secs(3600)
        );
        feed.consecutive_failures = 4;
        assert_eq!(
            feed.next_poll_delay(Duration::from_secs(300)),
            Duration::from_secs(3600)
        );
        feed.consecutive_failures = 3;
        assert_eq!(
            feed.next_poll_delay(Duration::from_secs(300)),
            Duration::from_secs(2400)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_due() {
        let base = Duration::from_secs(60);
        let mut feed = FeedState::new("1".into());
        let now = Instant::now();
        assert!(feed.is_due(now, base));

        feed.last_poll = Some(now);
        assert!(feed.is_due(now, base));

        feed.consecutive_failures = 1;
        assert!(!feed.is_due(now + Duration::from_secs(60), base));
        assert!(feed.is_due(now + Duration::from_secs(120), base));

        feed.status = FeedStatus::Suspended {
            reason: "gone".into(),
        };
        assert!(!feed.is_due(now + Duration::from_secs(7200), base));
    }
}
