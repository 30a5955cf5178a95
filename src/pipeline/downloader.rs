//! Bounded, content-type-checked image downloads.
//!
//! The response body is streamed chunk by chunk and abandoned as soon as it
//! exceeds the size cap. Idle connections are never pooled, so every fetch
//! runs on its own connection, and no cookies are kept between fetches.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, REFERER, RETRY_AFTER};
use thiserror::Error;
use tracing::debug;

use crate::models::{Candidate, FetchResult};
use crate::scrapers::http_client::DEFAULT_USER_AGENT;
use crate::scrapers::retry::{parse_retry_after, RetryHint, RetryPolicy, Retryable, Sleeper, TokioSleeper};

/// Content type assumed when a server sends none.
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("response exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("unexpected content type '{0}'")]
    ContentType(String),

    #[error("malformed data URI: {0}")]
    DataUri(String),
}

impl DownloadError {
    /// Whether this is a property of the candidate rather than a fetch failure.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::ContentType(_) | Self::DataUri(_))
    }
}

impl Retryable for DownloadError {
    fn retry_hint(&self) -> RetryHint {
        match self {
            Self::Http(e) if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() => {
                RetryHint::Yes
            }
            Self::Status {
                status: 429,
                retry_after: Some(wait),
            } => RetryHint::After(*wait),
            Self::Status { status, .. } if *status == 429 || (500..600).contains(status) => {
                RetryHint::Yes
            }
            _ => RetryHint::No,
        }
    }
}

/// Fetches candidate bytes.
pub struct Downloader {
    client: reqwest::Client,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Downloader {
    pub fn new(user_agent: Option<&str>) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .pool_max_idle_per_host(0)
            .build()?;

        Ok(Self {
            client,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retry = retry;
        self.sleeper = sleeper;
        self
    }

    /// Fetch a candidate's bytes.
    ///
    /// Fails with [`DownloadError::ContentType`] before reading the body if
    /// the declared type is not `image/*` (or a byte stream, when
    /// `allow_octet_stream` is set), and with [`DownloadError::TooLarge`]
    /// as soon as more than `max_bytes` have been received.
    pub async fn fetch(
        &self,
        candidate: &Candidate,
        timeout: Duration,
        max_bytes: u64,
        allow_octet_stream: bool,
    ) -> Result<FetchResult, DownloadError> {
        let (bytes, content_type) = if candidate.is_data_uri() {
            decode_data_uri(&candidate.url, max_bytes, allow_octet_stream)?
        } else {
            let label = format!("download {}", candidate.url);
            self.retry
                .run(&label, self.sleeper.as_ref(), |_| {
                    self.fetch_once(candidate, timeout, max_bytes, allow_octet_stream)
                })
                .await?
        };

        Ok(FetchResult {
            candidate: candidate.clone(),
            bytes,
            content_type,
        })
    }

    async fn fetch_once(
        &self,
        candidate: &Candidate,
        timeout: Duration,
        max_bytes: u64,
        allow_octet_stream: bool,
    ) -> Result<(Vec<u8>, String), DownloadError> {
        let mut request = self.client.get(&candidate.url).timeout(timeout);
        if let Some(referer) = &candidate.referer {
            request = request.header(REFERER, referer);
        }
        let mut response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(
                response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            return Err(DownloadError::Status {
                status: status.as_u16(),
                retry_after,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(media_type)
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());
        check_content_type(&content_type, allow_octet_stream)?;

        let declared_len = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if matches!(declared_len, Some(len) if len > max_bytes) {
            return Err(DownloadError::TooLarge { limit: max_bytes });
        }

        let mut bytes = Vec::with_capacity(declared_len.unwrap_or(0).min(max_bytes) as usize);
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() as u64 + chunk.len() as u64 > max_bytes {
                debug!("aborting {}: over {} bytes", candidate.url, max_bytes);
                return Err(DownloadError::TooLarge { limit: max_bytes });
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok((bytes, content_type))
    }
}

/// Lowercased media type without parameters.
fn media_type(header: &str) -> String {
    header
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

fn check_content_type(content_type: &str, allow_octet_stream: bool) -> Result<(), DownloadError> {
    let is_stream = matches!(content_type, "application/octet-stream" | "binary/octet-stream");
    if content_type.starts_with("image/") || (allow_octet_stream && is_stream) {
        Ok(())
    } else {
        Err(DownloadError::ContentType(content_type.to_string()))
    }
}

/// Decode a `data:` URI locally, under the same rules as a network fetch.
fn decode_data_uri(
    uri: &str,
    max_bytes: u64,
    allow_octet_stream: bool,
) -> Result<(Vec<u8>, String), DownloadError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| DownloadError::DataUri("missing data: prefix".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| DownloadError::DataUri("missing ',' separator".to_string()))?;

    let is_base64 = meta.to_lowercase().ends_with(";base64");
    let content_type = match media_type(meta) {
        t if t.is_empty() => "text/plain".to_string(),
        t => t,
    };
    check_content_type(&content_type, allow_octet_stream)?;

    // Base64 expands 3 bytes to 4 characters.
    let estimated = if is_base64 {
        payload.len() as u64 / 4 * 3
    } else {
        payload.len() as u64
    };
    if estimated > max_bytes {
        return Err(DownloadError::TooLarge { limit: max_bytes });
    }

    let bytes = if is_base64 {
        let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(cleaned.as_bytes())
            .map_err(|e| DownloadError::DataUri(e.to_string()))?
    } else {
        urlencoding::decode_binary(payload.as_bytes()).into_owned()
    };
    if bytes.len() as u64 > max_bytes {
        return Err(DownloadError::TooLarge { limit: max_bytes });
    }

    Ok((bytes, content_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_strips_parameters() {
        assert_eq!(media_type("Image/PNG; charset=binary"), "image/png");
        assert_eq!(media_type("text/html"), "text/html");
    }

    #[test]
    fn test_content_type_rules() {
        assert!(check_content_type("image/gif", false).is_ok());
        assert!(check_content_type("text/html", true).is_err());
        assert!(check_content_type("application/octet-stream", false).is_err());
        assert!(check_content_type("application/octet-stream", true).is_ok());
    }

    #[test]
    fn test_decode_base64_data_uri() {
        let (bytes, content_type) =
            decode_data_uri("data:image/png;base64,aGVsbG8=", 1024, false).unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(content_type, "image/png");
    }

    #[test]
    fn test_data_uri_limits() {
        assert!(matches!(
            decode_data_uri("data:image/png;base64,aGVsbG8=", 2, false),
            Err(DownloadError::TooLarge { limit: 2 })
        ));
        assert!(matches!(
            decode_data_uri("data:text/html,<b>hi</b>", 1024, false),
            Err(DownloadError::ContentType(_))
        ));
        assert!(matches!(
            decode_data_uri("data:image/png;base64", 1024, false),
            Err(DownloadError::DataUri(_))
        ));
    }

    #[test]
    fn test_status_retry_hints() {
        let e = DownloadError::Status {
            status: 404,
            retry_after: None,
        };
        assert_eq!(e.retry_hint(), RetryHint::No);

        let e = DownloadError::Status {
            status: 429,
            retry_after: None,
        };
        assert_eq!(e.retry_hint(), RetryHint::Yes);

        let e = DownloadError::TooLarge { limit: 1 };
        assert_eq!(e.retry_hint(), RetryHint::No);
        assert!(!e.is_rejection());
        assert!(DownloadError::ContentType("text/html".into()).is_rejection());
    }
}
