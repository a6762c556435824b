use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{BotConfig, CredentialArgs, PageSizeConfig, ReplyArgs};
use crate::scheduler::{
    DividedBudget, DEFAULT_MAX_PAGE_SIZE, DEFAULT_MIN_PAGE_SIZE, DEFAULT_PAGE_BUDGET,
};

/// Monitor several lists with a shared reply quota
#[derive(Args, Debug, Clone)]
pub struct DaemonCommand {
    /// List IDs or URLs to monitor
    #[arg(short, long = "list", required = true, action = clap::ArgAction::Append)]
    pub lists: Vec<String>,

    /// Seconds per polling cycle across all lists
    #[arg(short, long, default_value = "90")]
    pub interval: u64,

    /// Tweets fetched per cycle, split across the lists
    #[arg(long, default_value_t = DEFAULT_PAGE_BUDGET)]
    pub page_budget: u32,

    #[arg(long, default_value_t = DEFAULT_MIN_PAGE_SIZE)]
    pub min_page_size: u32,

    #[arg(long, default_value_t = DEFAULT_MAX_PAGE_SIZE)]
    pub max_page_size: u32,

    /// Poll the lists of a cycle concurrently
    #[arg(short, long)]
    pub concurrent: bool,

    #[command(flatten)]
    pub replies: ReplyArgs,
}

impl DaemonCommand {
    pub fn bot_config(&self) -> Result<BotConfig> {
        let page_size = PageSizeConfig::Divided(DividedBudget {
            budget: self.page_budget,
            min: self.min_page_size,
            max: self.max_page_size,
        });
        let config = BotConfig::new(&self.lists, self.interval, page_size, &self.replies)?
            .with_concurrent(self.concurrent);
        Ok(config)
    }

    pub async fn execute(&self, credentials: &CredentialArgs) -> Result<()> {
        let config = self.bot_config()?;
        info!(
            "Starting daemon for {list_count} lists with {interval} second cycles",
            list_count = config.feeds.len(),
            interval = self.interval
        );

        let cancel = CancellationToken::new();
        super::cancel_on_shutdown_signal(cancel.clone());
        super::run_monitor(config, credentials, cancel).await
    }
}
