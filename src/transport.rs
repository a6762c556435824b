//! Boundary between the monitoring core and the upstream feed API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::twitter::TwitterError;

/// A post fetched from a feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub text: String,
    /// Any retweet, quote or reply linkage
    pub is_repost_or_reply: bool,
}

/// A resolved post author
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub display_handle: String,
}

/// Feed-read/post-reply operations the poller and dispatcher depend on.
///
/// Every failure is a typed [`TwitterError`]; the backoff controller maps it
/// to a retry decision.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Most recent posts of a feed, with repost/reply linkage resolved
    async fn fetch_recent_posts(
        &self,
        feed_id: &str,
        page_size: u32,
    ) -> Result<Vec<Post>, TwitterError>;

    /// Returns `Ok(None)` when the author does not exist (anymore)
    async fn resolve_author(&self, author_id: &str) -> Result<Option<Author>, TwitterError>;

    /// Publish `text` as a reply to `post_id` addressed to `author_handle`;
    /// returns the id of the created reply
    async fn publish_reply(
        &self,
        post_id: &str,
        author_handle: &str,
        text: &str,
    ) -> Result<String, TwitterError>;
}
