use anyhow::{Context, Result};
use tracing::info;

use crate::config::CredentialArgs;
use crate::dispatcher::{truncate_reply, DEFAULT_MAX_REPLY_CHARS};
use crate::llm::{presence_penalty, ReplyGenerator, ReplyLanguage};

/// Generate a reply for `text` without publishing anything
pub async fn execute(text: &str, credentials: &CredentialArgs) -> Result<()> {
    let generator = super::reply_generator(credentials)?;

    info!(
        "Testing reply generation ({language:?}, presence penalty {penalty})",
        language = ReplyLanguage::detect(text),
        penalty = presence_penalty(text)
    );
    let reply = generate_reply(generator.as_ref(), text).await?;

    println!("Tweet: {text}");
    println!("Reply: {reply}");
    println!("Length: {len}", len = reply.chars().count());
    Ok(())
}

/// Generates and truncates a reply exactly as the dispatcher would
pub async fn generate_reply(generator: &dyn ReplyGenerator, text: &str) -> Result<String> {
    let reply = generator
        .generate(text, DEFAULT_MAX_REPLY_CHARS)
        .await
        .context("Failed to generate reply")?;
    Ok(truncate_reply(reply.trim(), DEFAULT_MAX_REPLY_CHARS))
}
