//! HTTP client shared by source adapters for search/API traffic.
//!
//! Wraps a `reqwest::Client` with the source's user agent, timeout and
//! [`RetryPolicy`]. No cookie store is kept; credentials are attached as
//! explicit headers so nothing leaks between sources.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::retry::{parse_retry_after, RetryPolicy, Sleeper, TokioSleeper};
use super::SourceError;

/// Default user agent, matching a desktop browser as most image hosts expect.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Retrying HTTP client scoped to one source.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    source_id: String,
    headers: HeaderMap,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl HttpClient {
    /// Create a client with the default retry policy.
    pub fn new(source_id: &str, timeout: Duration, user_agent: Option<&str>) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            source_id: source_id.to_string(),
            headers: HeaderMap::new(),
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Replace the retry policy and the sleeper used between attempts.
    pub fn with_retry(mut self, retry: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retry = retry;
        self.sleeper = sleeper;
        self
    }

    /// Attach a header sent on every request from this client.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Result<Self, SourceError> {
        let value = HeaderValue::from_str(value)
            .map_err(|e| SourceError::Config(format!("invalid {} header: {}", name, e)))?;
        self.headers.insert(HeaderName::from_static(name), value);
        Ok(self)
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// GET a URL with query parameters and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let body = self.get_text_with_query(url, query).await?;
        serde_json::from_str(&body).map_err(|e| SourceError::Parse(format!("{}: {}", url, e)))
    }

    /// GET a URL and return the body as text.
    pub async fn get_text(&self, url: &str) -> Result<String, SourceError> {
        self.get_text_with_query(url, &[]).await
    }

    async fn get_text_with_query(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<String, SourceError> {
        let label = format!("{} GET {}", self.source_id, url);
        self.retry
            .run(&label, self.sleeper.as_ref(), |_| self.send_once(url, query))
            .await
    }

    async fn send_once(&self, url: &str, query: &[(&str, String)]) -> Result<String, SourceError> {
        debug!("{}: GET {}", self.source_id, url);
        let response = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(
                response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            return Err(SourceError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                retry_after,
            });
        }

        Ok(response.text().await?)
    }
}
