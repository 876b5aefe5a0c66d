//! HTTP client for the BoardGameGeek XML API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::{config::AppConfig, error::ProviderError};

use super::CollectionProvider;

/// Reqwest-backed provider client with the retry policy the provider
/// expects: 202 means "still processing, ask again", transport
/// failures get a small retry budget with backoff.
#[derive(Debug, Clone)]
pub struct BggClient {
    http: reqwest::Client,
    base_url: String,
    max_retries: u32,
    retry_backoff: Duration,
    retry_202_delay: Duration,
}

impl BggClient {
    /// Build a client from configuration.
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
            retry_202_delay: config.retry_202_delay(),
        })
    }

    /// Fetch a URL, absorbing 202 responses and retrying transport
    /// failures. A 202 never consumes the retry budget.
    async fn fetch_with_retry(&self, url: &str) -> Result<String, ProviderError> {
        let mut attempts = 0;
        loop {
            let err = match self.http.get(url).send().await {
                Ok(response) if response.status() == StatusCode::ACCEPTED => {
                    debug!("provider still preparing {url}, waiting");
                    tokio::time::sleep(self.retry_202_delay).await;
                    continue;
                }
                Ok(response) if response.status().is_success() => {
                    match response.text().await {
                        Ok(body) => return Ok(body),
                        Err(err) => ProviderError::Unavailable(err),
                    }
                }
                Ok(response) => ProviderError::Http(response.status().as_u16()),
                Err(err) => ProviderError::Unavailable(err),
            };

            attempts += 1;
            if attempts >= self.max_retries {
                return Err(err);
            }
            warn!("provider call failed (attempt {attempts}): {err}");
            tokio::time::sleep(self.retry_backoff).await;
        }
    }

    fn collection_endpoints(&self, username: &str) -> Vec<String> {
        let encoded = urlencode(username);
        // Strictest query first; some collections only answer the
        // looser forms.
        vec![
            format!(
                "{}/collection?username={encoded}&own=1&subtype=boardgame&excludesubtype=boardgameexpansion",
                self.base_url
            ),
            format!(
                "{}/collection?username={encoded}&own=1&subtype=boardgame",
                self.base_url
            ),
            format!(
                "{}/collection?username={encoded}&subtype=boardgame",
                self.base_url
            ),
        ]
    }
}

#[async_trait]
impl CollectionProvider for BggClient {
    async fn fetch_collection(&self, username: &str) -> Result<String, ProviderError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ProviderError::InvalidInput);
        }

        let mut last_error = None;
        for endpoint in self.collection_endpoints(username) {
            let body = match self.fetch_with_retry(&endpoint).await {
                Ok(body) => body,
                Err(err) => {
                    warn!("collection endpoint failed: {err}");
                    last_error = Some(err);
                    continue;
                }
            };

            match classify_collection_body(&body, username) {
                Ok(()) => return Ok(body),
                Err(err) => {
                    debug!("collection endpoint rejected: {err}");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::Parse("no collection endpoint answered".to_string())))
    }

    async fn fetch_details(&self, ids: &[String]) -> Result<String, ProviderError> {
        if ids.is_empty() {
            return Err(ProviderError::InvalidInput);
        }
        let url = format!("{}/thing?id={}&stats=1", self.base_url, ids.join(","));
        self.fetch_with_retry(&url).await
    }
}

/// Inspect a collection body for the provider's embedded error
/// markers before attempting to parse it.
fn classify_collection_body(body: &str, username: &str) -> Result<(), ProviderError> {
    if body.contains("Invalid username") {
        return Err(ProviderError::UserNotFound(username.to_string()));
    }
    if body.contains("has not marked any items as owned")
        || body.contains("collection is private")
    {
        return Err(ProviderError::CollectionPrivateOrEmpty(username.to_string()));
    }
    if body.trim().is_empty() || !body.contains("<items") {
        return Err(ProviderError::Parse(
            "empty or invalid collection response".to_string(),
        ));
    }
    Ok(())
}

fn urlencode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '~') {
            out.push(ch);
        } else {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_provider_error_markers() {
        assert!(matches!(
            classify_collection_body("<errors>Invalid username specified</errors>", "ghost"),
            Err(ProviderError::UserNotFound(_))
        ));
        assert!(matches!(
            classify_collection_body("User has not marked any items as owned", "empty"),
            Err(ProviderError::CollectionPrivateOrEmpty(_))
        ));
        assert!(matches!(
            classify_collection_body("Your collection is private", "hidden"),
            Err(ProviderError::CollectionPrivateOrEmpty(_))
        ));
        assert!(matches!(
            classify_collection_body("", "anyone"),
            Err(ProviderError::Parse(_))
        ));
        assert!(classify_collection_body("<items totalitems=\"1\"/>", "alice").is_ok());
    }

    #[test]
    fn encodes_usernames_for_urls() {
        assert_eq!(urlencode("plain-name_1"), "plain-name_1");
        assert_eq!(urlencode("two words"), "two%20words");
        assert_eq!(urlencode("a&b"), "a%26b");
    }
}
