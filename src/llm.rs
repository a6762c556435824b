//! Reply text generation.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error_utils::{create_http_client_with_timeout, parse_http_response_json, preview};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Reply used when running without a generation backend
pub const STATIC_REPLY: &str = "[Test Reply] This is a default response when GPT is unavailable.";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TOKENS: u32 = 100;
const TEMPERATURE: f32 = 0.85;
const FREQUENCY_PENALTY: f32 = 0.3;

const TECHNICAL_KEYWORDS: &[&str] = &[
    "defi",
    "nft",
    "token",
    "cycle",
    "market",
    "analysis",
    "yield",
    "protocol",
    "chain",
    "blockchain",
    "trading",
];

const SYSTEM_PROMPT: &str = "You are a friendly bilingual (English/Chinese) crypto enthusiast having conversations on Twitter. Your approach:
1. Be genuinely interested in others' thoughts and perspectives
2. Share insights about crypto/web3 in an accessible way
3. Ask thoughtful follow-up questions to encourage discussion
4. Keep responses concise and natural (under {max_chars} chars)
5. Match the language of the tweet (Chinese/English)
6. Use plain language, explaining technical concepts simply
7. Share market insights when relevant to the conversation
8. Focus on building genuine connections through dialogue

Current market context: {market_context}

Match the language of the original tweet (English/Chinese).
Keep responses natural and conversational, like talking to a friend.
Ask questions when appropriate to encourage further discussion.
Avoid using exclamation marks, emojis, or hashtags.";

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("OpenAI API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Generator returned no reply text")]
    EmptyResponse,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Turns a post's text into reply text
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// `max_chars` is the longest reply the transport accepts
    async fn generate(&self, source_text: &str, max_chars: usize) -> Result<String, GenerateError>;
}

/// Generator that always answers with the same text
#[derive(Debug, Clone)]
pub struct StaticReply {
    text: String,
}

impl Default for StaticReply {
    fn default() -> Self {
        Self {
            text: STATIC_REPLY.to_string(),
        }
    }
}

impl StaticReply {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl ReplyGenerator for StaticReply {
    async fn generate(&self, _source_text: &str, _max_chars: usize) -> Result<String, GenerateError> {
        Ok(self.text.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyLanguage {
    English,
    Chinese,
    Mixed,
}

impl ReplyLanguage {
    /// Chinese when CJK ideographs make up more than half the characters
    pub fn detect(text: &str) -> Self {
        let total = text.chars().count();
        let cjk = text
            .chars()
            .filter(|c| ('\u{4e00}'..='\u{9fff}').contains(c))
            .count();

        if cjk * 2 > total {
            ReplyLanguage::Chinese
        } else if cjk > 0 {
            ReplyLanguage::Mixed
        } else {
            ReplyLanguage::English
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            ReplyLanguage::English => "Reply in English",
            ReplyLanguage::Chinese => "Reply in Chinese",
            ReplyLanguage::Mixed => "Reply in both Chinese and English",
        }
    }
}

/// Technical tweets get a higher presence penalty for more varied depth
pub fn presence_penalty(text: &str) -> f32 {
    let lower = text.to_lowercase();
    if TECHNICAL_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        0.7
    } else {
        0.6
    }
}

pub fn system_prompt(max_chars: usize, market_context: &str) -> String {
    SYSTEM_PROMPT
        .replace("{max_chars}", &max_chars.to_string())
        .replace("{market_context}", market_context)
}

pub fn user_prompt(tweet_text: &str, max_chars: usize) -> String {
    let language = ReplyLanguage::detect(tweet_text);
    format!(
        "Generate a brief, engaging reply to this tweet (must be under {max_chars} characters). {instruction}. Tweet: {tweet_text}",
        instruction = language.instruction()
    )
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub market_context: String,
    pub max_attempts: u32,
    /// First retry delay; doubles on each further attempt
    pub initial_retry_interval: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: OPENAI_API_BASE.to_string(),
            market_context: String::new(),
            max_attempts: 3,
            initial_retry_interval: Duration::from_secs(1),
        }
    }
}

/// OpenAI chat-completions backed generator
pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> anyhow::Result<Self> {
        let client = create_http_client_with_timeout(REQUEST_TIMEOUT)
            .context("Failed to create OpenAI HTTP client")?;
        Ok(Self { client, config })
    }

    fn build_request(&self, tweet_text: &str, max_chars: usize) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt(max_chars, &self.config.market_context),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt(tweet_text, max_chars),
                },
            ],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            frequency_penalty: FREQUENCY_PENALTY,
            presence_penalty: presence_penalty(tweet_text),
        }
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, GenerateError> {
        let url = format!(
            "{base}/chat/completions",
            base = self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await
            .context("Failed to send request to OpenAI")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerateError::Api {
                status: status.as_u16(),
                message: preview(body.trim(), 200),
            });
        }

        let body: ChatResponse = parse_http_response_json(response, "OpenAI chat").await?;
        let reply = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .unwrap_or_default();

        if reply.is_empty() {
            return Err(GenerateError::EmptyResponse);
        }
        Ok(reply)
    }

    fn retry_backoff(&self) -> backoff::ExponentialBackoff {
        backoff::ExponentialBackoff {
            initial_interval: self.config.initial_retry_interval,
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: Duration::from_secs(60),
            max_elapsed_time: Some(Duration::from_secs(300)),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ReplyGenerator for OpenAiClient {
    async fn generate(&self, source_text: &str, max_chars: usize) -> Result<String, GenerateError> {
        let request = self.build_request(source_text, max_chars);
        let attempts = AtomicU32::new(0);

        debug!(
            model = %self.config.model,
            "Generating reply for: {text}",
            text = preview(source_text, 50)
        );

        backoff::future::retry(self.retry_backoff(), || async {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            match self.complete(&request).await {
                Ok(reply) => Ok(reply),
                // Client errors other than rate limiting will not fix themselves
                Err(GenerateError::Api { status, message })
                    if (400..500).contains(&status) && status != 429 =>
                {
                    Err(backoff::Error::permanent(GenerateError::Api { status, message }))
                }
                Err(e) if attempt >= self.config.max_attempts => {
                    warn!("Error generating response (attempt {attempt}/{max}): {e}", max = self.config.max_attempts);
                    Err(backoff::Error::permanent(e))
                }
                Err(e) => {
                    warn!("Error generating response (attempt {attempt}/{max}): {e}", max = self.config.max_attempts);
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;

    fn test_config(base_url: &str) -> OpenAiConfig {
        OpenAiConfig {
            base_url: base_url.to_string(),
            initial_retry_interval: Duration::from_millis(10),
            ..OpenAiConfig::new("sk-test")
        }
    }

    #[test]
    fn test_language_detection() {
        assert_eq!(ReplyLanguage::detect("gm frens"), ReplyLanguage::English);
        assert_eq!(ReplyLanguage::detect("比特币今天涨了"), ReplyLanguage::Chinese);
        assert_eq!(
            ReplyLanguage::detect("BTC pumping today 比特币"),
            ReplyLanguage::Mixed
        );
        assert_eq!(ReplyLanguage::detect(""), ReplyLanguage::English);
    }

    #[test]
    fn test_presence_penalty() {
        assert_eq!(presence_penalty("New DeFi protocol launched"), 0.7);
        assert_eq!(presence_penalty("Good morning everyone"), 0.6);
    }

    #[test]
    fn test_prompts() {
        let system = system_prompt(280, "BTC at ATH");
        assert!(system.contains("under 280 chars"));
        assert!(system.contains("Current market context: BTC at ATH"));

        let user = user_prompt("比特币今天涨了", 280);
        assert!(user.contains("must be under 280 characters"));
        assert!(user.contains("Reply in Chinese"));
        assert!(user.ends_with("Tweet: 比特币今天涨了"));
    }

    #[tokio::test]
    async fn test_static_reply() {
        let generator = StaticReply::default();
        assert_eq!(generator.generate("anything", 280).await.unwrap(), STATIC_REPLY);
    }

    #[tokio::test]
    async fn test_generate_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": DEFAULT_MODEL,
                "max_tokens": 100
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices": [{"message": {"role": "assistant", "content": "  What got you into DeFi?  "}}]}"#,
            )
            .create_async()
            .await;

        let client = OpenAiClient::new(test_config(&server.url())).unwrap();
        let reply = client.generate("DeFi summer is back", 280).await.unwrap();
        mock.assert_async().await;
        assert_eq!(reply, "What got you into DeFi?");
    }

    #[tokio::test]
    async fn test_generate_retries_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("upstream exploded")
            .expect(3)
            .create_async()
            .await;

        let client = OpenAiClient::new(test_config(&server.url())).unwrap();
        let err = client.generate("gm", 280).await.unwrap_err();
        mock.assert_async().await;
        assert!(matches!(err, GenerateError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_generate_does_not_retry_bad_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error": {"message": "Incorrect API key"}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = OpenAiClient::new(test_config(&server.url())).unwrap();
        let err = client.generate("gm", 280).await.unwrap_err();
        mock.assert_async().await;
        assert!(matches!(err, GenerateError::Api { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_generate_empty_choice() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;

        let client = OpenAiClient::new(OpenAiConfig {
            max_attempts: 1,
            ..test_config(&server.url())
        })
        .unwrap();
        let err = client.generate("gm", 280).await.unwrap_err();
        assert!(matches!(err, GenerateError::EmptyResponse));
    }
}
