use clap::Args;
use std::time::Duration;
use thiserror::Error;

use crate::dedup::DEFAULT_HIGH_WATERMARK;
use crate::dispatcher::DEFAULT_MAX_REPLY_CHARS;
use crate::llm::{OpenAiConfig, DEFAULT_MODEL};
use crate::poller::QuotaSkipPolicy;
use crate::quota::DEFAULT_MAX_DAILY_REPLIES;
use crate::scheduler::{CyclePacing, DividedBudget, FixedPageSize, PageSizePolicy};
use crate::twitter::parse_list_id;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one list must be given with --list")]
    NoFeeds,

    #[error("invalid list '{input}': {message}")]
    InvalidFeed { input: String, message: String },

    #[error("the polling interval must be at least one second")]
    ZeroInterval,

    #[error("--max-daily-replies must be at least 1")]
    ZeroDailyMax,

    #[error("dedup low watermark {low} must be between 1 and the capacity {high}")]
    InvalidWatermarks { high: usize, low: usize },

    #[error("page size bounds are invalid: min {min}, max {max}")]
    InvalidPageSize { min: u32, max: u32 },
}

/// Credentials and endpoints, from flags or the environment
#[derive(Args, Debug, Clone, Default)]
pub struct CredentialArgs {
    /// Twitter API v2 app bearer token, used for reading lists and users
    #[arg(long, global = true, env = "TWITTER_BEARER_TOKEN", hide_env_values = true)]
    pub bearer_token: Option<String>,

    /// OAuth 2.0 user access token, required for publishing replies
    #[arg(long, global = true, env = "TWITTER_USER_ACCESS_TOKEN", hide_env_values = true)]
    pub user_access_token: Option<String>,

    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Override for OpenAI-compatible endpoints
    #[arg(long, global = true, env = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,

    #[arg(long, global = true, env = "OPENAI_MODEL", default_value = DEFAULT_MODEL)]
    pub openai_model: String,

    /// Reply with a fixed test message when no OpenAI key is configured
    #[arg(long, global = true)]
    pub allow_static_reply: bool,

    /// Extra market context appended to the reply prompt
    #[arg(long, global = true, env = "LISTREPLY_MARKET_CONTEXT")]
    pub market_context: Option<String>,
}

impl CredentialArgs {
    /// OpenAI settings, or `None` when no API key is available
    pub fn openai_config(&self) -> Option<OpenAiConfig> {
        let api_key = self.openai_api_key.as_deref().filter(|key| !key.is_empty())?;
        let mut config = OpenAiConfig::new(api_key);
        config.model = self.openai_model.clone();
        if let Some(base_url) = &self.openai_base_url {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(context) = &self.market_context {
            config.market_context = context.clone();
        }
        Some(config)
    }
}

/// Reply limits shared by `daemon` and `watch`
#[derive(Args, Debug, Clone)]
pub struct ReplyArgs {
    /// Maximum replies per author per day
    #[arg(long, default_value_t = DEFAULT_MAX_DAILY_REPLIES)]
    pub max_daily_replies: u32,

    /// Number of processed tweet ids remembered
    #[arg(long, default_value_t = DEFAULT_HIGH_WATERMARK)]
    pub dedup_capacity: usize,

    /// Ids kept after the capacity is exceeded (defaults to the capacity)
    #[arg(long)]
    pub dedup_low_watermark: Option<usize>,

    /// Whether tweets skipped for quota are retried later or dropped
    #[arg(long, default_value = "retry")]
    pub quota_skip: QuotaSkipPolicy,

    /// Log replies instead of publishing them
    #[arg(long)]
    pub dry_run: bool,
}

impl Default for ReplyArgs {
    fn default() -> Self {
        Self {
            max_daily_replies: DEFAULT_MAX_DAILY_REPLIES,
            dedup_capacity: DEFAULT_HIGH_WATERMARK,
            dedup_low_watermark: None,
            quota_skip: QuotaSkipPolicy::default(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSizeConfig {
    Divided(DividedBudget),
    Fixed(u32),
}

impl PageSizeConfig {
    pub fn into_policy(self) -> Box<dyn PageSizePolicy> {
        match self {
            PageSizeConfig::Divided(policy) => Box::new(policy),
            PageSizeConfig::Fixed(size) => Box::new(FixedPageSize(size)),
        }
    }
}

/// Validated settings for one monitoring run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    pub feeds: Vec<String>,
    pub cycle_budget: Duration,
    pub pacing: CyclePacing,
    pub page_size: PageSizeConfig,
    pub max_daily_replies: u32,
    pub dedup_high_watermark: usize,
    pub dedup_low_watermark: usize,
    pub quota_skip: QuotaSkipPolicy,
    pub concurrent: bool,
    pub dry_run: bool,
    pub max_reply_chars: usize,
}

impl BotConfig {
    pub fn new(
        lists: &[String],
        interval_secs: u64,
        page_size: PageSizeConfig,
        replies: &ReplyArgs,
    ) -> Result<Self, ConfigError> {
        let feeds = lists
            .iter()
            .map(|input| {
                parse_list_id(input).map_err(|e| ConfigError::InvalidFeed {
                    input: input.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let config = Self {
            feeds,
            cycle_budget: Duration::from_secs(interval_secs),
            pacing: CyclePacing::Budget,
            page_size,
            max_daily_replies: replies.max_daily_replies,
            dedup_high_watermark: replies.dedup_capacity,
            dedup_low_watermark: replies
                .dedup_low_watermark
                .unwrap_or(replies.dedup_capacity),
            quota_skip: replies.quota_skip,
            concurrent: false,
            dry_run: replies.dry_run,
            max_reply_chars: DEFAULT_MAX_REPLY_CHARS,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_pacing(mut self, pacing: CyclePacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feeds.is_empty() {
            return Err(ConfigError::NoFeeds);
        }
        if self.cycle_budget.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.max_daily_replies == 0 {
            return Err(ConfigError::ZeroDailyMax);
        }
        if self.dedup_low_watermark == 0 || self.dedup_low_watermark > self.dedup_high_watermark {
            return Err(ConfigError::InvalidWatermarks {
                high: self.dedup_high_watermark,
                low: self.dedup_low_watermark,
            });
        }
        match self.page_size {
            PageSizeConfig::Divided(DividedBudget { min, max, .. }) if min == 0 || min > max => {
                Err(ConfigError::InvalidPageSize { min, max })
            }
            PageSizeConfig::Fixed(0) => Err(ConfigError::InvalidPageSize { min: 0, max: 0 }),
            _ => Ok(()),
        }
    }
}
