use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::config::CredentialArgs;
use crate::error_utils::preview;
use crate::transport::Transport;
use crate::twitter;

const CHECK_PAGE_SIZE: u32 = 5;
const PREVIEW_COUNT: usize = 3;

/// What one list looked like when checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListReport {
    pub list_id: String,
    pub tweet_count: usize,
    /// `(handle, text preview)` of the first tweets
    pub previews: Vec<(String, String)>,
}

/// Fetch a handful of tweets from each list to confirm access
pub async fn execute(lists: &[String], credentials: &CredentialArgs) -> Result<()> {
    let client = super::twitter_client(credentials, false)?;

    let mut failures = 0;
    for input in lists {
        let list_id = twitter::parse_list_id(input).context("Failed to parse list ID")?;
        info!("Checking list {list_id}");

        match check_list(&client, &list_id).await {
            Ok(report) => {
                info!(
                    "Success! Found {count} tweets in list {list_id}",
                    count = report.tweet_count
                );
                for (handle, text) in &report.previews {
                    info!("  @{handle}: {text}");
                }
            }
            Err(e) => {
                error!("Error accessing list {list_id}: {e}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {total} lists could not be read", total = lists.len());
    }
    Ok(())
}

pub async fn check_list(transport: &dyn Transport, list_id: &str) -> Result<ListReport> {
    let posts = transport
        .fetch_recent_posts(list_id, CHECK_PAGE_SIZE)
        .await
        .with_context(|| format!("Failed to fetch tweets from list {list_id}"))?;

    let mut previews = Vec::new();
    for post in posts.iter().take(PREVIEW_COUNT) {
        let handle = match transport.resolve_author(&post.author_id).await {
            Ok(Some(author)) => author.display_handle,
            Ok(None) => post.author_id.clone(),
            Err(e) => {
                warn!("Failed to resolve author {id}: {e}", id = post.author_id);
                post.author_id.clone()
            }
        };
        previews.push((handle, preview(&post.text, 100)));
    }

    Ok(ListReport {
        list_id: list_id.to_string(),
        tweet_count: posts.len(),
        previews,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twitter::TwitterClient;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_check_list_previews() {
        let mut server = mockito::Server::new_async().await;
        let _tweets = server
            .mock("GET", "/lists/42/tweets")
            .match_query(Matcher::UrlEncoded("max_results".into(), "5".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "data": [
                        {"id": "1", "text": "first", "author_id": "100"},
                        {"id": "2", "text": "second", "author_id": "404"},
                        {"id": "3", "text": "third", "author_id": "100"},
                        {"id": "4", "text": "fourth", "author_id": "100"}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;
        let _alice = server
            .mock("GET", "/users/100")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": {"id": "100", "name": "Alice", "username": "alice"}}"#)
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/users/404")
            .with_status(404)
            .create_async()
            .await;

        let client = TwitterClient::new("token", None)
            .unwrap()
            .with_base_url(&server.url());
        let report = check_list(&client, "42").await.unwrap();

        assert_eq!(report.tweet_count, 4);
        assert_eq!(
            report.previews,
            vec![
                ("alice".to_string(), "first".to_string()),
                ("404".to_string(), "second".to_string()),
                ("alice".to_string(), "third".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_check_list_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/lists/42/tweets")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"title": "Unauthorized"}"#)
            .create_async()
            .await;

        let client = TwitterClient::new("bad", None)
            .unwrap()
            .with_base_url(&server.url());
        let err = check_list(&client, "42").await.unwrap_err();
        assert!(err.to_string().contains("list 42"));
    }
}
