use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::BotContext;
use crate::dispatcher::{DispatchError, DispatchOutcome, ReplyDispatcher};
use crate::error_utils::preview;
use crate::retry_policy::{backoff_wait, classify, BackoffPolicy, ErrorCategory, WaitDecision};
use crate::transport::{Author, Post, Transport};
use crate::twitter::TwitterError;

pub const DEFAULT_FETCH_ATTEMPTS: u32 = 3;

/// Counts for one `poll_once` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollResult {
    pub fetched: usize,
    /// Reposts and replies dropped before any other check
    pub filtered: usize,
    pub replied: usize,
    /// Dispatches that did not publish; those posts stay unseen
    pub failed: usize,
    pub skipped_seen: usize,
    pub skipped_quota: usize,
    pub skipped_unresolved: usize,
}

impl PollResult {
    pub fn processed(&self) -> usize {
        self.replied
    }

    pub fn skipped(&self) -> usize {
        self.skipped_seen + self.skipped_quota + self.skipped_unresolved
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("feed {feed_id} failed permanently: {source}")]
    Fatal {
        feed_id: String,
        #[source]
        source: TwitterError,
    },

    #[error("feed {feed_id} gave up after {attempts} attempts: {source}")]
    Exhausted {
        feed_id: String,
        attempts: u32,
        #[source]
        source: TwitterError,
    },

    #[error("poll cancelled by shutdown")]
    Cancelled,
}

impl PollError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PollError::Fatal { .. })
    }
}

/// What happens to a post whose author is out of quota
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QuotaSkipPolicy {
    /// Leave it unseen so a later cycle can reply once the quota resets
    #[default]
    Retry,
    /// Mark it seen and never reply to it
    Abandon,
}

impl FromStr for QuotaSkipPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "retry" => Ok(QuotaSkipPolicy::Retry),
            "abandon" => Ok(QuotaSkipPolicy::Abandon),
            other => Err(format!(
                "unknown quota skip policy '{other}' (expected 'retry' or 'abandon')"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Attempts per fetch or author lookup, including the first
    pub fetch_attempts: u32,
    pub quota_skip: QuotaSkipPolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            fetch_attempts: DEFAULT_FETCH_ATTEMPTS,
            quota_skip: QuotaSkipPolicy::default(),
        }
    }
}

pub struct FeedPoller {
    transport: Arc<dyn Transport>,
    dispatcher: Arc<ReplyDispatcher>,
    context: Arc<BotContext>,
    policy: BackoffPolicy,
    config: PollerConfig,
    cancel: CancellationToken,
}

impl FeedPoller {
    pub fn new(
        transport: Arc<dyn Transport>,
        dispatcher: Arc<ReplyDispatcher>,
        context: Arc<BotContext>,
        policy: BackoffPolicy,
        config: PollerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            context,
            policy,
            config,
            cancel,
        }
    }

    pub fn context(&self) -> &Arc<BotContext> {
        &self.context
    }

    /// One pass over the most recent page of `feed_id`
    pub async fn poll_once(&self, feed_id: &str, page_size: u32) -> Result<PollResult, PollError> {
        let mut result = PollResult::default();

        let operation = format!("fetch of list {feed_id}");
        let posts = self
            .call_with_backoff(&operation, feed_id, || {
                self.transport.fetch_recent_posts(feed_id, page_size)
            })
            .await?;
        result.fetched = posts.len();

        let (originals, reposts): (Vec<Post>, Vec<Post>) =
            posts.into_iter().partition(|post| !post.is_repost_or_reply);
        result.filtered = reposts.len();

        if originals.is_empty() {
            info!("No new original tweets found in list {feed_id}");
        }

        // Lookups are cached for this call only
        let mut authors: HashMap<String, Option<Author>> = HashMap::new();

        for post in &originals {
            if self.cancel.is_cancelled() {
                return Err(PollError::Cancelled);
            }

            let _post_guard = self.context.post_locks.lock(&post.id).await;
            if self.context.dedup.lock().await.seen(&post.id) {
                debug!("Skipping already processed tweet {id}", id = post.id);
                result.skipped_seen += 1;
                continue;
            }

            let cached = authors.get(&post.author_id).cloned();
            let author = match cached {
                Some(author) => author,
                None => match self.resolve_author(feed_id, &post.author_id).await {
                    Ok(author) => {
                        authors.insert(post.author_id.clone(), author.clone());
                        author
                    }
                    Err(PollError::Exhausted { attempts, source, .. }) => {
                        warn!(
                            "Could not resolve author {author_id} of tweet {id} after {attempts} attempts, skipping: {source}",
                            author_id = post.author_id,
                            id = post.id
                        );
                        result.skipped_unresolved += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            };
            let Some(author) = author else {
                warn!(
                    "Author {author_id} of tweet {id} not found, skipping",
                    author_id = post.author_id,
                    id = post.id
                );
                result.skipped_unresolved += 1;
                continue;
            };

            info!(
                "Processing tweet from @{handle}: {text}",
                handle = author.display_handle,
                text = preview(&post.text, 50)
            );

            let _author_guard = self.context.author_locks.lock(&author.id).await;
            let today = self.context.today();
            let (can_reply, max) = {
                let quota = self.context.quota.lock().await;
                (quota.can_reply(&author.id, today), quota.max_daily_replies())
            };
            if !can_reply {
                info!(
                    "Skipping reply to @{handle} - daily limit of {max} replies reached",
                    handle = author.display_handle
                );
                result.skipped_quota += 1;
                if self.config.quota_skip == QuotaSkipPolicy::Abandon {
                    self.context.dedup.lock().await.mark_seen(&post.id);
                }
                continue;
            }

            match self.dispatcher.dispatch(post, &author.display_handle).await {
                Ok(DispatchOutcome::Sent { reply_id }) => {
                    match self.context.quota.lock().await.record_reply(&author.id, today) {
                        Ok(count) => info!(
                            "Replied to @{handle} with {reply_id} ({count}/{max} today)",
                            handle = author.display_handle
                        ),
                        Err(e) => warn!("{e}"),
                    }
                    let evicted = self.context.dedup.lock().await.mark_seen(&post.id);
                    if evicted > 0 {
                        debug!("Evicted {evicted} old tweet ids from the dedup set");
                    }
                    result.replied += 1;
                }
                Ok(DispatchOutcome::Failed { reason }) => {
                    warn!(
                        "Reply to tweet {id} by @{handle} failed: {reason}",
                        id = post.id,
                        handle = author.display_handle
                    );
                    result.failed += 1;
                }
                Err(DispatchError::Fatal(source)) => {
                    return Err(PollError::Fatal {
                        feed_id: feed_id.to_string(),
                        source,
                    });
                }
                Err(DispatchError::Cancelled) => return Err(PollError::Cancelled),
            }
        }

        info!(
            "List {feed_id}: found {fetched} tweets, filtered {filtered}, skipped {skipped}, replied {replied}",
            fetched = result.fetched,
            filtered = result.filtered,
            skipped = result.skipped(),
            replied = result.replied
        );

        Ok(result)
    }

    async fn resolve_author(
        &self,
        feed_id: &str,
        author_id: &str,
    ) -> Result<Option<Author>, PollError> {
        let operation = format!("lookup of author {author_id}");
        self.call_with_backoff(&operation, feed_id, || async move {
            match self.transport.resolve_author(author_id).await {
                Err(TwitterError::NotFound { .. }) => Ok(None),
                other => other,
            }
        })
        .await
    }

    async fn call_with_backoff<T, F, Fut>(
        &self,
        operation: &str,
        feed_id: &str,
        mut call: F,
    ) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TwitterError>>,
    {
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(PollError::Cancelled);
            }
            attempt += 1;

            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let category = classify(&err);
            if category == ErrorCategory::Fatal {
                error!("Fatal error during {operation}, giving up: {err}");
                return Err(PollError::Fatal {
                    feed_id: feed_id.to_string(),
                    source: err,
                });
            }

            match self.policy.wait_policy(category, attempt) {
                WaitDecision::Wait(wait) if attempt < self.config.fetch_attempts => {
                    if !backoff_wait(operation, category, wait, attempt, &self.cancel).await {
                        return Err(PollError::Cancelled);
                    }
                }
                _ => {
                    error!("Giving up on {operation} after {attempt} attempts: {err}");
                    return Err(PollError::Exhausted {
                        feed_id: feed_id.to_string(),
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }
}
