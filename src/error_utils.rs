use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// HTTP request error handling utilities
///
/// Parse HTTP response as JSON with contextual error handling
pub async fn parse_http_response_json<T: DeserializeOwned>(
    response: reqwest::Response,
    api_desc: &str,
) -> Result<T> {
    response
        .json::<T>()
        .await
        .with_context(|| format!("Failed to parse {api_desc} response"))
}

/// Create HTTP client with a per-request timeout
pub fn create_http_client_with_timeout(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Shorten text for log lines, appending "..." when it was cut
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_http_client() {
        let client = create_http_client_with_timeout(Duration::from_secs(5)).unwrap();
        assert!(client.get("https://example.com").build().is_ok());
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("exactly ten", 11), "exactly ten");
        assert_eq!(preview("this is a long tweet", 7), "this is...");
        // Counts characters, not bytes
        assert_eq!(preview("比特币比特币", 2), "比特...");
    }
}
