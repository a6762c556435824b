#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use listreply::context::BotContext;
use listreply::datetime_utils::Clock;
use listreply::dedup::DedupTracker;
use listreply::dispatcher::{DispatcherConfig, ReplyDispatcher};
use listreply::llm::{GenerateError, ReplyGenerator};
use listreply::poller::{FeedPoller, PollerConfig};
use listreply::quota::QuotaManager;
use listreply::retry_policy::BackoffPolicy;
use listreply::transport::{Author, Post, Transport};
use listreply::twitter::TwitterError;

pub fn original(id: &str, author_id: &str) -> Post {
    Post {
        id: id.to_string(),
        author_id: author_id.to_string(),
        text: format!("tweet {id} by {author_id}"),
        is_repost_or_reply: false,
    }
}

pub fn repost(id: &str, author_id: &str) -> Post {
    Post {
        is_repost_or_reply: true,
        ..original(id, author_id)
    }
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub post_id: String,
    pub handle: String,
    pub text: String,
    pub at: Instant,
}

/// In-memory transport with scripted failures
#[derive(Default)]
pub struct MockTransport {
    pages: Mutex<HashMap<String, Vec<Post>>>,
    fetch_errors: Mutex<HashMap<String, VecDeque<TwitterError>>>,
    fetch_calls: Mutex<HashMap<String, usize>>,
    authors: Mutex<HashMap<String, String>>,
    lookups: Mutex<Vec<String>>,
    unreachable_authors: Mutex<Vec<String>>,
    publish_errors: Mutex<VecDeque<TwitterError>>,
    publish_attempts: Mutex<Vec<Instant>>,
    published: Mutex<Vec<Published>>,
    publish_delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_page(&self, feed_id: &str, posts: Vec<Post>) {
        self.pages
            .lock()
            .unwrap()
            .insert(feed_id.to_string(), posts);
    }

    pub fn push_fetch_error(&self, feed_id: &str, error: TwitterError) {
        self.fetch_errors
            .lock()
            .unwrap()
            .entry(feed_id.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn add_author(&self, author_id: &str, handle: &str) {
        self.authors
            .lock()
            .unwrap()
            .insert(author_id.to_string(), handle.to_string());
    }

    /// Every lookup of `author_id` times out
    pub fn make_author_unreachable(&self, author_id: &str) {
        self.unreachable_authors
            .lock()
            .unwrap()
            .push(author_id.to_string());
    }

    pub fn push_publish_error(&self, error: TwitterError) {
        self.publish_errors.lock().unwrap().push_back(error);
    }

    pub fn set_publish_delay(&self, delay: Duration) {
        *self.publish_delay.lock().unwrap() = Some(delay);
    }

    pub fn fetch_calls(&self, feed_id: &str) -> usize {
        self.fetch_calls
            .lock()
            .unwrap()
            .get(feed_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }

    pub fn publish_attempts(&self) -> Vec<Instant> {
        self.publish_attempts.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_ids(&self) -> Vec<String> {
        self.published()
            .into_iter()
            .map(|reply| reply.post_id)
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch_recent_posts(
        &self,
        feed_id: &str,
        page_size: u32,
    ) -> Result<Vec<Post>, TwitterError> {
        *self
            .fetch_calls
            .lock()
            .unwrap()
            .entry(feed_id.to_string())
            .or_default() += 1;

        let scripted = self
            .fetch_errors
            .lock()
            .unwrap()
            .get_mut(feed_id)
            .and_then(VecDeque::pop_front);
        if let Some(error) = scripted {
            return Err(error);
        }

        let pages = self.pages.lock().unwrap();
        let page = pages.get(feed_id).ok_or_else(|| TwitterError::NotFound {
            resource: format!("list:{feed_id}"),
        })?;
        Ok(page.iter().take(page_size as usize).cloned().collect())
    }

    async fn resolve_author(&self, author_id: &str) -> Result<Option<Author>, TwitterError> {
        self.lookups.lock().unwrap().push(author_id.to_string());
        if self
            .unreachable_authors
            .lock()
            .unwrap()
            .iter()
            .any(|id| id == author_id)
        {
            return Err(TwitterError::Network {
                message: "operation timed out".into(),
                timed_out: true,
            });
        }
        Ok(self
            .authors
            .lock()
            .unwrap()
            .get(author_id)
            .map(|handle| Author {
                id: author_id.to_string(),
                display_handle: handle.clone(),
            }))
    }

    async fn publish_reply(
        &self,
        post_id: &str,
        author_handle: &str,
        text: &str,
    ) -> Result<String, TwitterError> {
        self.publish_attempts.lock().unwrap().push(Instant::now());

        let delay = *self.publish_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.publish_errors.lock().unwrap().pop_front();
        if let Some(error) = scripted {
            return Err(error);
        }

        let mut published = self.published.lock().unwrap();
        published.push(Published {
            post_id: post_id.to_string(),
            handle: author_handle.to_string(),
            text: text.to_string(),
            at: Instant::now(),
        });
        Ok(format!("reply-{n}", n = published.len()))
    }
}

/// Generator that echoes the source text and counts calls
#[derive(Default)]
pub struct EchoGenerator {
    calls: Mutex<Vec<String>>,
    fail: Mutex<bool>,
}

impl EchoGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplyGenerator for EchoGenerator {
    async fn generate(&self, source_text: &str, _max_chars: usize) -> Result<String, GenerateError> {
        self.calls.lock().unwrap().push(source_text.to_string());
        if *self.fail.lock().unwrap() {
            return Err(GenerateError::EmptyResponse);
        }
        Ok(format!("re: {source_text}"))
    }
}

/// Clock whose date only changes when told to
pub struct ManualClock {
    today: Mutex<NaiveDate>,
}

impl ManualClock {
    pub fn new(today: NaiveDate) -> Arc<Self> {
        Arc::new(Self {
            today: Mutex::new(today),
        })
    }

    pub fn set(&self, today: NaiveDate) {
        *self.today.lock().unwrap() = today;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let today = *self.today.lock().unwrap();
        today
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc()
    }

    fn today(&self) -> NaiveDate {
        *self.today.lock().unwrap()
    }
}

/// Poller wired to the mocks the same way `run_monitor` wires real clients
pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub generator: Arc<EchoGenerator>,
    pub clock: Arc<ManualClock>,
    pub context: Arc<BotContext>,
    pub poller: Arc<FeedPoller>,
    pub cancel: CancellationToken,
}

pub struct HarnessOptions {
    pub max_daily_replies: u32,
    pub poller: PollerConfig,
    pub dispatcher: DispatcherConfig,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            max_daily_replies: 3,
            poller: PollerConfig::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(HarnessOptions::default())
    }

    pub fn with_options(options: HarnessOptions) -> Self {
        let transport = MockTransport::new();
        let generator = EchoGenerator::new();
        let clock = ManualClock::new(day(1));
        let cancel = CancellationToken::new();

        let context = Arc::new(
            BotContext::new(
                QuotaManager::new(options.max_daily_replies),
                DedupTracker::default(),
            )
            .with_clock(clock.clone()),
        );
        let dispatcher = Arc::new(ReplyDispatcher::new(
            transport.clone(),
            generator.clone(),
            BackoffPolicy::default(),
            options.dispatcher,
            cancel.clone(),
        ));
        let poller = Arc::new(FeedPoller::new(
            transport.clone(),
            dispatcher,
            context.clone(),
            BackoffPolicy::default(),
            options.poller,
            cancel.clone(),
        ));

        Self {
            transport,
            generator,
            clock,
            context,
            poller,
            cancel,
        }
    }

    pub async fn replies_today(&self, author_id: &str) -> u32 {
        self.context
            .quota
            .lock()
            .await
            .replies_today(author_id, self.clock.today())
    }

    pub async fn seen(&self, post_id: &str) -> bool {
        self.context.dedup.lock().await.seen(post_id)
    }

    pub async fn preload_quota(&self, author_id: &str, replies: u32) {
        let today = self.clock.today();
        let mut quota = self.context.quota.lock().await;
        for _ in 0..replies {
            quota.record_reply(author_id, today).unwrap();
        }
    }
}
