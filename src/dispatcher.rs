use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error_utils::preview;
use crate::llm::ReplyGenerator;
use crate::retry_policy::{backoff_wait, classify, BackoffPolicy, ErrorCategory, WaitDecision};
use crate::transport::{Post, Transport};
use crate::twitter::TwitterError;

/// Twitter's maximum message length
pub const DEFAULT_MAX_REPLY_CHARS: usize = 280;
pub const DEFAULT_DISPATCH_ATTEMPTS: u32 = 3;

const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { reply_id: String },
    /// The reply was not published; the post stays eligible for a later cycle
    Failed { reason: String },
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DispatchOutcome::Sent { .. })
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("publishing replies is not authorized: {0}")]
    Fatal(#[source] TwitterError),

    #[error("dispatch cancelled by shutdown")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Length limit of the published tweet, mention included
    pub max_reply_chars: usize,
    /// Publish attempts per reply, including the first
    pub max_attempts: u32,
    /// Log the reply instead of publishing it
    pub dry_run: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_reply_chars: DEFAULT_MAX_REPLY_CHARS,
            max_attempts: DEFAULT_DISPATCH_ATTEMPTS,
            dry_run: false,
        }
    }
}

/// Characters left for the reply body once the `@handle ` mention the
/// transport prepends is counted against `max_chars`
pub fn reply_budget(max_chars: usize, author_handle: &str) -> usize {
    max_chars.saturating_sub(author_handle.chars().count() + 2)
}

/// Cut `text` to at most `max_chars` characters, marking the cut with "..."
pub fn truncate_reply(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars < ELLIPSIS.len() {
        return text.chars().take(max_chars).collect();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Generates and publishes one reply.
///
/// Quota and dedup bookkeeping belong to the caller, which records a reply
/// only after [`DispatchOutcome::Sent`].
pub struct ReplyDispatcher {
    transport: Arc<dyn Transport>,
    generator: Arc<dyn ReplyGenerator>,
    policy: BackoffPolicy,
    config: DispatcherConfig,
    cancel: CancellationToken,
}

impl ReplyDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        generator: Arc<dyn ReplyGenerator>,
        policy: BackoffPolicy,
        config: DispatcherConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            generator,
            policy,
            config,
            cancel,
        }
    }

    pub async fn dispatch(
        &self,
        post: &Post,
        author_handle: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        if self.cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let budget = reply_budget(self.config.max_reply_chars, author_handle);
        let generated = match self.generator.generate(&post.text, budget).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to generate reply for tweet {id}: {e}", id = post.id);
                return Ok(DispatchOutcome::Failed {
                    reason: format!("generation failed: {e}"),
                });
            }
        };

        let reply = truncate_reply(generated.trim(), budget);
        if reply.is_empty() {
            warn!("Generator returned an empty reply for tweet {id}", id = post.id);
            return Ok(DispatchOutcome::Failed {
                reason: "empty reply".to_string(),
            });
        }

        if self.config.dry_run {
            info!(
                "[dry-run] Would reply to @{author_handle} on tweet {id}: {reply}",
                id = post.id
            );
            return Ok(DispatchOutcome::Sent {
                reply_id: format!("dry-run-{id}", id = post.id),
            });
        }

        let mut attempt = 0;
        loop {
            // Never start a new call once shutdown began
            if self.cancel.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }
            attempt += 1;

            let err = match self
                .transport
                .publish_reply(&post.id, author_handle, &reply)
                .await
            {
                Ok(reply_id) => {
                    info!(
                        "Successfully replied to @{author_handle}'s tweet {id}: {text}",
                        id = post.id,
                        text = preview(&post.text, 47)
                    );
                    return Ok(DispatchOutcome::Sent { reply_id });
                }
                Err(TwitterError::NotFound { .. }) => {
                    warn!("Tweet {id} no longer exists, dropping reply", id = post.id);
                    return Ok(DispatchOutcome::Failed {
                        reason: "tweet no longer exists".to_string(),
                    });
                }
                Err(err) => err,
            };

            let category = classify(&err);
            if category == ErrorCategory::Fatal {
                error!(
                    "Not authorized to reply to tweet {id}, giving up without retry: {err}",
                    id = post.id
                );
                return Err(DispatchError::Fatal(err));
            }

            match self.policy.wait_policy(category, attempt) {
                WaitDecision::Wait(wait) if attempt < self.config.max_attempts => {
                    let operation = format!("reply to tweet {id}", id = post.id);
                    if !backoff_wait(&operation, category, wait, attempt, &self.cancel).await {
                        return Err(DispatchError::Cancelled);
                    }
                }
                _ => {
                    warn!(
                        "Giving up on reply to tweet {id} after {attempt} attempts: {err}",
                        id = post.id
                    );
                    return Ok(DispatchOutcome::Failed {
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
}
