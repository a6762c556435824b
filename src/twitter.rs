use crate::datetime_utils::{duration_until_reset, unix_timestamp_now};
use crate::error_utils::{create_http_client_with_timeout, preview};
use crate::transport::{Author, Post, Transport};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Twitter API specific errors with structured information
#[derive(Debug, Error)]
pub enum TwitterError {
    #[error("Rate limit exceeded (retry after {retry_after:?}, remaining: {remaining:?})")]
    RateLimit {
        retry_after: Option<Duration>,
        remaining: Option<u64>,
    },

    #[error("Unauthorized (status {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Twitter server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {message}")]
    Network { message: String, timed_out: bool },

    #[error("Failed to decode {what}: {message}")]
    Decode { what: String, message: String },
}

pub const TWITTER_API_BASE: &str = "https://api.twitter.com/2";

const LIST_TWEET_FIELDS: &str = "author_id,referenced_tweets,text,created_at";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `max_results` range accepted by the list tweets endpoint
const LIST_PAGE_MIN: u32 = 1;
const LIST_PAGE_MAX: u32 = 100;

/// Twitter API rate limit information extracted from response headers
#[derive(Debug, Clone, Default)]
struct RateLimits {
    /// Maximum number of requests allowed in the current time window
    limit: Option<u64>,
    /// Number of requests remaining in the current time window
    remaining: Option<u64>,
    /// Unix timestamp when the rate limit resets
    reset: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Tweet {
    /// The tweet ID
    pub id: String,

    /// Tweet content text
    pub text: String,

    /// Author ID from API
    pub author_id: Option<String>,

    /// Retweet, quote and reply linkage
    pub referenced_tweets: Option<Vec<ReferencedTweet>>,

    /// Tweet creation date
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReferencedTweet {
    pub id: String,
    #[serde(rename = "type")]
    pub type_field: String,
}

impl Tweet {
    /// Converts the wire representation into a feed post.
    ///
    /// Tweets without an author cannot be quota-checked and are dropped.
    pub fn into_post(self) -> Option<Post> {
        let is_repost_or_reply = self
            .referenced_tweets
            .as_ref()
            .is_some_and(|refs| !refs.is_empty());
        let author_id = self.author_id?;
        Some(Post {
            id: self.id,
            author_id,
            text: self.text,
            is_repost_or_reply,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct User {
    pub id: String,
    pub name: Option<String>,
    pub username: String,
}

/// Problem object returned alongside (or instead of) `data`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiProblem {
    pub title: Option<String>,
    pub detail: Option<String>,
    #[serde(rename = "type")]
    pub type_field: Option<String>,
}

impl ApiProblem {
    fn is_not_found(&self) -> bool {
        self.type_field.as_deref() == Some("https://api.twitter.com/2/problems/resource-not-found")
            || self.title.as_deref() == Some("Not Found Error")
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListTweetsResponse {
    pub data: Option<Vec<Tweet>>,
    pub meta: Option<ListMeta>,
    pub errors: Option<Vec<ApiProblem>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListMeta {
    pub result_count: u32,
    pub next_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub data: Option<User>,
    pub errors: Option<Vec<ApiProblem>>,
}

#[derive(Debug, Serialize)]
struct CreateTweetRequest<'a> {
    text: String,
    reply: ReplySettings<'a>,
}

#[derive(Debug, Serialize)]
struct ReplySettings<'a> {
    in_reply_to_tweet_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateTweetResponse {
    data: CreatedTweet,
}

#[derive(Debug, Deserialize)]
struct CreatedTweet {
    id: String,
}

/// Twitter API v2 client.
///
/// Reads use the app-only bearer token; publishing needs an OAuth 2.0
/// user-context access token with `tweet.write`.
pub struct TwitterClient {
    client: Client,
    bearer_token: String,
    user_access_token: Option<String>,
    base_url: String,
}

impl TwitterClient {
    /// Creates a new Twitter client with the provided credentials
    pub fn new(bearer_token: &str, user_access_token: Option<&str>) -> Result<Self> {
        let client = create_http_client_with_timeout(REQUEST_TIMEOUT)
            .context("Failed to create Twitter HTTP client")?;

        Ok(Self {
            client,
            bearer_token: bearer_token.to_string(),
            user_access_token: user_access_token.map(str::to_string),
            base_url: TWITTER_API_BASE.to_string(),
        })
    }

    /// Points the client at a different API root (used against mock servers)
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn can_publish(&self) -> bool {
        self.user_access_token.is_some()
    }

    /// Parses rate limit headers from a response
    fn parse_rate_limit_headers(response: &reqwest::Response) -> RateLimits {
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
        };

        RateLimits {
            limit: header("x-rate-limit-limit"),
            remaining: header("x-rate-limit-remaining"),
            reset: header("x-rate-limit-reset"),
        }
    }

    /// Sends one request and maps any non-success response to a typed error.
    ///
    /// Retrying is left to the caller's backoff policy.
    async fn send(
        &self,
        resource: &str,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, TwitterError> {
        debug!(%resource, "Making request to Twitter API");

        let response = request
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|err| TwitterError::Network {
                timed_out: err.is_timeout(),
                message: err.to_string(),
            })?;

        let rate_limits = Self::parse_rate_limit_headers(&response);
        let status = response.status();

        if status.is_success() {
            debug!(
                "Received Twitter API response for {resource} with limits: {limit:?}/{remaining:?} until {reset:?}",
                limit = rate_limits.limit,
                remaining = rate_limits.remaining,
                reset = rate_limits.reset
            );
            return Ok(response);
        }

        let retry_after_header = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();

        Err(error_for_status(
            resource,
            status,
            &rate_limits,
            retry_after_header,
            &body,
            unix_timestamp_now(),
        ))
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, TwitterError> {
        response.json::<T>().await.map_err(|err| TwitterError::Decode {
            what: what.to_string(),
            message: err.to_string(),
        })
    }
}

/// Builds the typed error for a non-success response
fn error_for_status(
    resource: &str,
    status: StatusCode,
    rate_limits: &RateLimits,
    retry_after_header: Option<u64>,
    body: &str,
    now_unix: u64,
) -> TwitterError {
    let message = preview(body.trim(), 200);
    let status_code = status.as_u16();

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            // Prefer the window reset over Retry-After, like the API docs suggest
            let retry_after = rate_limits
                .reset
                .and_then(|reset| duration_until_reset(reset, now_unix))
                .or_else(|| retry_after_header.map(Duration::from_secs));
            debug!(
                "Rate limited by Twitter API for {resource}. Limit: {limit:?}, Remaining: {remaining:?}, Reset: {reset:?}",
                limit = rate_limits.limit,
                remaining = rate_limits.remaining,
                reset = rate_limits.reset
            );
            TwitterError::RateLimit {
                retry_after,
                remaining: rate_limits.remaining,
            }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TwitterError::Unauthorized {
            status: status_code,
            message,
        },
        StatusCode::NOT_FOUND => TwitterError::NotFound {
            resource: resource.to_string(),
        },
        s if s.is_server_error() => TwitterError::Server {
            status: status_code,
            message,
        },
        _ => TwitterError::Api {
            status: status_code,
            message,
        },
    }
}

#[async_trait]
impl Transport for TwitterClient {
    async fn fetch_recent_posts(
        &self,
        feed_id: &str,
        page_size: u32,
    ) -> Result<Vec<Post>, TwitterError> {
        let max_results = page_size.clamp(LIST_PAGE_MIN, LIST_PAGE_MAX);
        let url = format!("{base}/lists/{feed_id}/tweets", base = self.base_url);
        let request = self
            .client
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .query(&[
                ("max_results", max_results.to_string()),
                ("tweet.fields", LIST_TWEET_FIELDS.to_string()),
            ]);

        let resource = format!("list:{feed_id}");
        let response = self.send(&resource, request).await?;
        let body: ListTweetsResponse = Self::decode(response, "list tweets").await?;

        let Some(tweets) = body.data else {
            if body
                .errors
                .as_ref()
                .is_some_and(|errors| errors.iter().any(ApiProblem::is_not_found))
            {
                return Err(TwitterError::NotFound { resource });
            }
            debug!("List {feed_id} returned no tweets");
            return Ok(Vec::new());
        };

        let fetched = tweets.len();
        let posts: Vec<Post> = tweets.into_iter().filter_map(Tweet::into_post).collect();
        if posts.len() < fetched {
            debug!(
                "Dropped {dropped} tweets without author_id from list {feed_id}",
                dropped = fetched - posts.len()
            );
        }
        Ok(posts)
    }

    async fn resolve_author(&self, author_id: &str) -> Result<Option<Author>, TwitterError> {
        let url = format!("{base}/users/{author_id}", base = self.base_url);
        let request = self.client.get(&url).bearer_auth(&self.bearer_token);

        let response = match self.send(&format!("user:{author_id}"), request).await {
            Ok(response) => response,
            Err(TwitterError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };

        // Unknown users come back as 200 with an `errors` array and no data
        let body: UserResponse = Self::decode(response, "user").await?;
        Ok(body.data.map(|user| Author {
            id: user.id,
            display_handle: user.username,
        }))
    }

    async fn publish_reply(
        &self,
        post_id: &str,
        author_handle: &str,
        text: &str,
    ) -> Result<String, TwitterError> {
        let Some(user_token) = &self.user_access_token else {
            return Err(TwitterError::Unauthorized {
                status: 401,
                message: "no user access token configured for publishing".to_string(),
            });
        };

        let payload = CreateTweetRequest {
            text: format!("@{author_handle} {text}"),
            reply: ReplySettings {
                in_reply_to_tweet_id: post_id,
            },
        };
        let url = format!("{base}/tweets", base = self.base_url);
        let request = self.client.post(&url).bearer_auth(user_token).json(&payload);

        let response = self.send(&format!("reply:{post_id}"), request).await?;
        let created: CreateTweetResponse = Self::decode(response, "created tweet").await?;
        Ok(created.data.id)
    }
}

/// Extracts a list ID from a bare ID or a list URL
pub fn parse_list_id(url_or_id: &str) -> Result<String> {
    let url_or_id = url_or_id.trim();
    if url_or_id.is_empty() {
        bail!("List ID cannot be empty");
    }

    if url_or_id.chars().all(|c| c.is_ascii_digit()) {
        return Ok(url_or_id.to_string());
    }

    if let Ok(parsed_url) = Url::parse(url_or_id) {
        if parsed_url
            .host_str()
            .is_some_and(|h| h.contains("twitter.com") || h.contains("x.com"))
        {
            let path_segments: Vec<&str> = parsed_url
                .path_segments()
                .map_or(Vec::new(), |s| s.collect());

            // Path format should be /i/lists/list_id
            if let Some(pos) = path_segments.iter().position(|s| *s == "lists") {
                if let Some(id) = path_segments.get(pos + 1) {
                    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
                        return Ok((*id).to_string());
                    }
                }
            }
        }
    }

    let re = Regex::new(r"(?:twitter\.com|x\.com)/i/lists/(\d+)")
        .context("Failed to compile list ID regex")?;
    if let Some(captures) = re.captures(url_or_id) {
        if let Some(id_match) = captures.get(1) {
            return Ok(id_match.as_str().to_string());
        }
    }

    bail!("Could not extract list ID from: {url_or_id}")
}
