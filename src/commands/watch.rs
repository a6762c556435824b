use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{BotConfig, CredentialArgs, PageSizeConfig, ReplyArgs};
use crate::scheduler::CyclePacing;

/// Monitor a single list on its own interval
#[derive(Args, Debug, Clone)]
pub struct WatchCommand {
    /// List ID or URL to monitor
    #[arg(short, long)]
    pub list: String,

    /// Seconds to wait after each poll finishes
    #[arg(short, long, default_value = "60")]
    pub interval: u64,

    /// Tweets fetched per poll
    #[arg(short, long, default_value = "5")]
    pub page_size: u32,

    #[command(flatten)]
    pub replies: ReplyArgs,
}

impl WatchCommand {
    pub fn bot_config(&self) -> Result<BotConfig> {
        let config = BotConfig::new(
            std::slice::from_ref(&self.list),
            self.interval,
            PageSizeConfig::Fixed(self.page_size),
            &self.replies,
        )?
        .with_pacing(CyclePacing::Interval);
        Ok(config)
    }

    pub async fn execute(&self, credentials: &CredentialArgs) -> Result<()> {
        let config = self.bot_config()?;
        info!(
            "Starting to monitor list {list_id} every {interval} seconds",
            list_id = config.feeds[0],
            interval = self.interval
        );

        let cancel = CancellationToken::new();
        super::cancel_on_shutdown_signal(cancel.clone());
        super::run_monitor(config, credentials, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        watch: WatchCommand,
    }

    #[test]
    fn test_watch_defaults() {
        let cli = TestCli::parse_from(["listreply", "--list", "https://x.com/i/lists/42"]);
        let config = cli.watch.bot_config().unwrap();

        assert_eq!(config.feeds, vec!["42".to_string()]);
        assert_eq!(config.cycle_budget, Duration::from_secs(60));
        assert_eq!(config.pacing, CyclePacing::Interval);
        assert_eq!(config.page_size, PageSizeConfig::Fixed(5));
    }

    #[test]
    fn test_watch_rejects_zero_page_size() {
        let cli = TestCli::parse_from(["listreply", "--list", "42", "--page-size", "0"]);
        assert!(cli.watch.bot_config().is_err());
    }
}
