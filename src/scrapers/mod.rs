//! Source adapters: everything that knows how to query one content source.
//!
//! Each source (API or static page) implements [`SourceAdapter`], returning
//! candidates one page at a time. [`PageCursor`] drives an adapter through
//! its pages and decides when it is exhausted, so the rest of the pipeline
//! never sees source-specific pagination.

pub mod config;
pub mod http_client;
pub mod retry;
pub mod sources;

pub use config::{OutputFormatConfig, SourceConfig, SourceKind};
pub use http_client::HttpClient;
pub use retry::{Backoff, RecordingSleeper, RetryHint, RetryPolicy, Retryable, Sleeper, TokioSleeper};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{Candidate, SearchRequest};

/// Error type for source adapter operations.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status {
        status: u16,
        url: String,
        retry_after: Option<Duration>,
    },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Source API error: {0}")]
    Api(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SourceError {
    /// Errors that make a source unusable before any request is sent.
    pub fn is_setup_fatal(&self) -> bool {
        matches!(self, Self::MissingCredential(_) | Self::Config(_))
    }
}

impl Retryable for SourceError {
    fn retry_hint(&self) -> RetryHint {
        match self {
            Self::Http(e) if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() => {
                RetryHint::Yes
            }
            Self::Status {
                status: 429,
                retry_after: Some(wait),
                ..
            } => RetryHint::After(*wait),
            Self::Status { status, .. } if *status == 429 || (500..600).contains(status) => {
                RetryHint::Yes
            }
            _ => RetryHint::No,
        }
    }
}

/// One page of candidates from a source.
#[derive(Debug, Clone, Default)]
pub struct CandidatePage {
    pub candidates: Vec<Candidate>,
    /// Explicit "no more pages" signal from the source.
    pub is_last: bool,
}

impl CandidatePage {
    pub fn new(candidates: Vec<Candidate>, is_last: bool) -> Self {
        Self {
            candidates,
            is_last,
        }
    }

    pub fn last() -> Self {
        Self {
            candidates: Vec::new(),
            is_last: true,
        }
    }
}

/// Trait for pluggable content sources.
///
/// Implementations encapsulate one source's query and pagination
/// mechanics. Pages are 1-based and may be re-requested; there is no
/// resumption across process restarts.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Unique identifier for this source (e.g. "pixiv", "giphy").
    fn name(&self) -> &str;

    /// Whether candidates from this source may be inline `data:` URIs.
    fn allows_data_uris(&self) -> bool {
        false
    }

    /// Check credentials and configuration before any network activity.
    fn validate(&self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Fetch one page of candidates for `query`.
    ///
    /// `count_needed` is a hint for page size; adapters may return more or fewer.
    async fn fetch_page(
        &self,
        request: &SearchRequest,
        query: &str,
        page: u32,
        count_needed: usize,
    ) -> Result<CandidatePage, SourceError>;
}

/// Walks one adapter through its pages for one query string.
///
/// An adapter is exhausted when it flags its last page, or after
/// `empty_page_limit` consecutive pages produced nothing (failed pages
/// count as empty).
#[derive(Debug, Clone)]
pub struct PageCursor {
    query: String,
    next_page: u32,
    consecutive_empty: u32,
    empty_page_limit: u32,
    exhausted: bool,
    pages_fetched: u32,
}

impl PageCursor {
    pub fn new(query: impl Into<String>, empty_page_limit: u32) -> Self {
        Self {
            query: query.into(),
            next_page: 1,
            consecutive_empty: 0,
            empty_page_limit: empty_page_limit.max(1),
            exhausted: false,
            pages_fetched: 0,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Fetch the next non-empty page, or return `None` once exhausted.
    ///
    /// Setup-fatal errors are returned; any other error marks the page as
    /// empty and moves on.
    pub async fn next_batch(
        &mut self,
        adapter: &dyn SourceAdapter,
        request: &SearchRequest,
        count_needed: usize,
    ) -> Result<Option<Vec<Candidate>>, SourceError> {
        while !self.exhausted {
            let page = self.next_page;
            self.next_page += 1;
            self.pages_fetched += 1;

            debug!("{}: fetching page {} for '{}'", adapter.name(), page, self.query);
            let result = adapter.fetch_page(request, &self.query, page, count_needed).await;

            let fetched = match result {
                Ok(fetched) => fetched,
                Err(e) if e.is_setup_fatal() => return Err(e),
                Err(e) => {
                    warn!("{}: page {} failed: {}", adapter.name(), page, e);
                    self.record_empty(adapter.name());
                    continue;
                }
            };

            if fetched.is_last {
                info!("{}: reached last page ({}) for '{}'", adapter.name(), page, self.query);
                self.exhausted = true;
            }

            if fetched.candidates.is_empty() {
                self.record_empty(adapter.name());
                continue;
            }

            self.consecutive_empty = 0;
            return Ok(Some(fetched.candidates));
        }
        Ok(None)
    }

    fn record_empty(&mut self, source: &str) {
        self.consecutive_empty += 1;
        if self.consecutive_empty >= self.empty_page_limit && !self.exhausted {
            info!(
                "{}: {} consecutive empty pages for '{}', treating as exhausted",
                source, self.consecutive_empty, self.query
            );
            self.exhausted = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Adapter returning scripted page results in order.
    struct Scripted {
        pages: Mutex<Vec<Result<CandidatePage, SourceError>>>,
    }

    impl Scripted {
        fn new(mut pages: Vec<Result<CandidatePage, SourceError>>) -> Self {
            pages.reverse();
            Self {
                pages: Mutex::new(pages),
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch_page(
            &self,
            _request: &SearchRequest,
            _query: &str,
            _page: u32,
            _count_needed: usize,
        ) -> Result<CandidatePage, SourceError> {
            self.pages
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(CandidatePage::default()))
        }
    }

    fn page(n: usize, is_last: bool) -> Result<CandidatePage, SourceError> {
        let candidates = (0..n)
            .map(|i| Candidate::new(format!("https://img.example.com/{}.png", i), "scripted"))
            .collect();
        Ok(CandidatePage::new(candidates, is_last))
    }

    fn request() -> SearchRequest {
        SearchRequest::new("cats", 10, Vec::<String>::new()).unwrap()
    }

    #[tokio::test]
    async fn test_cursor_stops_on_last_page_flag() {
        let adapter = Scripted::new(vec![page(2, false), page(1, true), page(5, false)]);
        let mut cursor = PageCursor::new("cats", 3);
        let req = request();

        assert_eq!(cursor.next_batch(&adapter, &req, 10).await.unwrap().unwrap().len(), 2);
        assert_eq!(cursor.next_batch(&adapter, &req, 10).await.unwrap().unwrap().len(), 1);
        assert!(cursor.is_exhausted());
        assert!(cursor.next_batch(&adapter, &req, 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cursor_skips_failed_pages_until_limit() {
        let adapter = Scripted::new(vec![
            Err(SourceError::Parse("bad json".into())),
            page(3, false),
            Err(SourceError::Parse("bad json".into())),
            page(0, false),
        ]);
        let mut cursor = PageCursor::new("cats", 2);
        let req = request();

        assert_eq!(cursor.next_batch(&adapter, &req, 10).await.unwrap().unwrap().len(), 3);
        assert!(cursor.next_batch(&adapter, &req, 10).await.unwrap().is_none());
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.pages_fetched(), 4);
    }

    #[tokio::test]
    async fn test_cursor_propagates_setup_fatal() {
        let adapter = Scripted::new(vec![Err(SourceError::MissingCredential("session".into()))]);
        let mut cursor = PageCursor::new("cats", 3);

        let err = cursor.next_batch(&adapter, &request(), 10).await.unwrap_err();
        assert!(err.is_setup_fatal());
    }

    #[test]
    fn test_status_retry_hints() {
        let e = SourceError::Status {
            status: 503,
            url: "u".into(),
            retry_after: None,
        };
        assert_eq!(e.retry_hint(), RetryHint::Yes);

        let e = SourceError::Status {
            status: 429,
            url: "u".into(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(e.retry_hint(), RetryHint::After(Duration::from_secs(3)));

        let e = SourceError::Status {
            status: 404,
            url: "u".into(),
            retry_after: None,
        };
        assert_eq!(e.retry_hint(), RetryHint::No);
    }
}
