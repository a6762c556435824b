use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{BotConfig, CredentialArgs};
use crate::context::BotContext;
use crate::datetime_utils::format_for_display;
use crate::dedup::DedupTracker;
use crate::dispatcher::{DispatcherConfig, ReplyDispatcher, DEFAULT_DISPATCH_ATTEMPTS};
use crate::llm::{OpenAiClient, ReplyGenerator, StaticReply};
use crate::poller::{FeedPoller, PollerConfig, DEFAULT_FETCH_ATTEMPTS};
use crate::quota::QuotaManager;
use crate::retry_policy::BackoffPolicy;
use crate::scheduler::{self, Scheduler, SchedulerConfig, StopReason};
use crate::twitter::TwitterClient;

pub mod check_lists;
pub mod daemon;
pub mod test_reply;
pub mod watch;

/// Twitter client from the configured tokens
pub fn twitter_client(credentials: &CredentialArgs, publishing: bool) -> Result<TwitterClient> {
    let bearer_token = credentials
        .bearer_token
        .as_deref()
        .filter(|token| !token.is_empty())
        .context("TWITTER_BEARER_TOKEN is not set. Use --bearer-token or the environment")?;

    let client = TwitterClient::new(bearer_token, credentials.user_access_token.as_deref())
        .context("Failed to initialize Twitter client")?;

    if publishing && !client.can_publish() {
        bail!(
            "TWITTER_USER_ACCESS_TOKEN is required to publish replies. Set it or run with --dry-run"
        );
    }
    Ok(client)
}

/// OpenAI generator, or the static test reply when explicitly allowed
pub fn reply_generator(credentials: &CredentialArgs) -> Result<Arc<dyn ReplyGenerator>> {
    match credentials.openai_config() {
        Some(config) => {
            info!("Using OpenAI model {model} for replies", model = config.model);
            let client = OpenAiClient::new(config).context("Failed to initialize OpenAI client")?;
            Ok(Arc::new(client))
        }
        None if credentials.allow_static_reply => {
            warn!("OPENAI_API_KEY is not set, replying with the static test message");
            Ok(Arc::new(StaticReply::default()))
        }
        None => bail!(
            "OPENAI_API_KEY is not set. Set it or pass --allow-static-reply to use a fixed test reply"
        ),
    }
}

/// Cancels `cancel` on Ctrl+C, or on SIGTERM where there is one
pub fn cancel_on_shutdown_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        let signal_name = wait_for_shutdown_signal().await;
        info!("Received shutdown signal ({signal_name}), finishing in-flight work...");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    let mut terminate = match unix_signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {e}");
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {e}");
            }
            return "Ctrl+C";
        }
    };

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl+C: {e}");
            }
            "Ctrl+C"
        }
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> &'static str {
    if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {e}");
    }
    "Ctrl+C"
}

/// Wires the monitoring stack for `config` and runs it until shutdown
pub async fn run_monitor(
    config: BotConfig,
    credentials: &CredentialArgs,
    cancel: CancellationToken,
) -> Result<()> {
    let transport = Arc::new(twitter_client(credentials, !config.dry_run)?);
    let generator = reply_generator(credentials)?;

    let dedup = DedupTracker::new(config.dedup_high_watermark, config.dedup_low_watermark)
        .context("Invalid dedup configuration")?;
    let context = Arc::new(BotContext::new(
        QuotaManager::new(config.max_daily_replies),
        dedup,
    ));

    info!(
        "Monitoring started at {time} UTC",
        time = format_for_display(&context.clock.now())
    );
    info!(
        "Maximum replies per user per day: {max}",
        max = config.max_daily_replies
    );
    if config.dry_run {
        info!("Dry-run mode: replies are logged, not published");
    }

    let policy = BackoffPolicy::default();
    let dispatcher = Arc::new(ReplyDispatcher::new(
        transport.clone(),
        generator,
        policy.clone(),
        DispatcherConfig {
            max_reply_chars: config.max_reply_chars,
            max_attempts: DEFAULT_DISPATCH_ATTEMPTS,
            dry_run: config.dry_run,
        },
        cancel.clone(),
    ));
    let poller = Arc::new(FeedPoller::new(
        transport,
        dispatcher,
        context.clone(),
        policy,
        PollerConfig {
            fetch_attempts: DEFAULT_FETCH_ATTEMPTS,
            quota_skip: config.quota_skip,
        },
        cancel.clone(),
    ));

    let mut scheduler = Scheduler::new(
        poller,
        config.feeds.clone(),
        SchedulerConfig {
            cycle_budget: config.cycle_budget,
            pacing: config.pacing,
            concurrent: config.concurrent,
        },
        cancel,
    )
    .with_page_size_policy(config.page_size.into_policy());

    let stats_handle = scheduler::spawn_stats_reporter(context.clone());
    let reason = scheduler.run().await;
    stats_handle.abort();

    scheduler::log_final_stats(&context).await;

    match reason {
        StopReason::Cancelled => {
            info!("Shutdown complete");
            Ok(())
        }
        StopReason::AllFeedsSuspended => {
            let reasons: Vec<String> = scheduler
                .feeds()
                .iter()
                .map(|feed| format!("{id}: {status:?}", id = feed.feed_id, status = feed.status))
                .collect();
            bail!(
                "All monitored lists were suspended: {reasons}",
                reasons = reasons.join("; ")
            )
        }
    }
}
