//! Image discovery on plain HTML pages.
//!
//! Each configured page URL is one page index. A URL may contain a
//! `{topic}` placeholder, which is replaced with the encoded query; pages
//! without one are only visited for the bare topic.

use std::collections::HashSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::super::{CandidatePage, HttpClient, SourceAdapter, SourceError};
use crate::models::{Candidate, SearchRequest};

const TOPIC_PLACEHOLDER: &str = "{topic}";

/// Attributes that commonly carry the real image URL on lazy-loading pages.
const SRC_ATTRS: [&str; 4] = ["src", "data-src", "data-original", "data-lazy-src"];

pub struct StaticPageSource {
    name: String,
    urls: Vec<String>,
    allow_data_uris: bool,
    client: HttpClient,
}

impl StaticPageSource {
    pub fn new(name: &str, urls: Vec<String>, allow_data_uris: bool, client: HttpClient) -> Self {
        Self {
            name: name.to_string(),
            urls,
            allow_data_uris,
            client,
        }
    }

    fn page_url(&self, template: &str, query: &str) -> String {
        template.replace(TOPIC_PLACEHOLDER, &urlencoding::encode(query))
    }
}

#[async_trait]
impl SourceAdapter for StaticPageSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn allows_data_uris(&self) -> bool {
        self.allow_data_uris
    }

    fn validate(&self) -> Result<(), SourceError> {
        if self.urls.is_empty() {
            return Err(SourceError::Config(format!(
                "source '{}' has no page urls",
                self.name
            )));
        }
        for url in &self.urls {
            Url::parse(&url.replace(TOPIC_PLACEHOLDER, "x"))
                .map_err(|e| SourceError::Config(format!("invalid page url '{}': {}", url, e)))?;
        }
        Ok(())
    }

    async fn fetch_page(
        &self,
        request: &SearchRequest,
        query: &str,
        page: u32,
        _count_needed: usize,
    ) -> Result<CandidatePage, SourceError> {
        let Some(template) = (page as usize).checked_sub(1).and_then(|i| self.urls.get(i)) else {
            return Ok(CandidatePage::last());
        };
        let is_last = page as usize >= self.urls.len();

        // Without a placeholder the page is the same for every topic variant.
        if !template.contains(TOPIC_PLACEHOLDER) && query != request.topic() {
            return Ok(CandidatePage::new(Vec::new(), is_last));
        }

        let page_url = self.page_url(template, query);
        let base = Url::parse(&page_url)
            .map_err(|e| SourceError::Config(format!("invalid page url '{}': {}", page_url, e)))?;
        let html = self.client.get_text(&page_url).await?;

        let found = extract_images(&html, &base, self.allow_data_uris);
        debug!("{}: {} images on {}", self.name, found.len(), page_url);

        let candidates = found
            .into_iter()
            .map(|img| {
                let mut candidate = Candidate::new(img.url, self.name.as_str())
                    .with_referer(page_url.clone())
                    .with_dimensions(img.width.unwrap_or(0), img.height.unwrap_or(0));
                if let Some(alt) = img.alt {
                    candidate = candidate.with_title(alt);
                }
                candidate
            })
            .collect();

        Ok(CandidatePage::new(candidates, is_last))
    }
}

/// An image reference found in a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundImage {
    pub url: String,
    pub alt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

static IMAGE_URL_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn image_url_regex() -> Option<&'static Regex> {
    IMAGE_URL_RE
        .get_or_init(|| {
            Regex::new(r#"(?i)https?://[^\s"'<>()]+?\.(?:jpe?g|png|gif|webp|bmp)(?:\?[^\s"'<>()]*)?"#).ok()
        })
        .as_ref()
}

/// Collect image URLs from `<img>` elements and bare links in the markup.
///
/// Relative URLs are resolved against `base`. Order of first appearance is
/// kept and repeats are dropped.
pub fn extract_images(html: &str, base: &Url, allow_data_uris: bool) -> Vec<FoundImage> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut found = Vec::new();

    let mut push = |raw: &str, alt: Option<String>, width: Option<u32>, height: Option<u32>| {
        let raw = raw.trim();
        if raw.is_empty() {
            return;
        }
        let url = if raw.starts_with("data:") {
            if !allow_data_uris || !raw.starts_with("data:image/") {
                return;
            }
            raw.to_string()
        } else {
            match base.join(raw) {
                Ok(u) if matches!(u.scheme(), "http" | "https") => u.to_string(),
                _ => return,
            }
        };
        if seen.insert(url.clone()) {
            found.push(FoundImage {
                url,
                alt,
                width,
                height,
            });
        }
    };

    if let Ok(selector) = Selector::parse("img") {
        for img in document.select(&selector) {
            let el = img.value();
            let alt = el
                .attr("alt")
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(String::from);
            let width = el.attr("width").and_then(|w| w.trim().parse().ok());
            let height = el.attr("height").and_then(|h| h.trim().parse().ok());

            for attr in SRC_ATTRS {
                if let Some(value) = el.attr(attr) {
                    push(value, alt.clone(), width, height);
                }
            }
            if let Some(srcset) = el.attr("srcset") {
                for entry in srcset.split(',') {
                    if let Some(u) = entry.split_whitespace().next() {
                        push(u, alt.clone(), None, None);
                    }
                }
            }
        }
    }

    if let Some(re) = image_url_regex() {
        for m in re.find_iter(html) {
            push(m.as_str(), None, None, None);
        }
    }

    found
}
