//! Cheap URL screening before any network cost is spent.
//!
//! A heuristic filter: it removes obviously bad candidates (tracking
//! pixels, thumbnails, avatars) and will have false positives both ways.

use std::collections::BTreeSet;

use thiserror::Error;

/// Terms rejected for every source: thumbnail/icon indicators and
/// tracking or placeholder images.
pub const DEFAULT_BLACKLIST: &[&str] = &[
    "thumb",
    "icon",
    "avatar",
    "/gen_204",
    "blank.gif",
    "spacer",
    "1x1",
    "tracking",
    "pixel.gif",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlRejection {
    #[error("not an absolute http(s) URL")]
    NotHttp,
    #[error("contains blacklisted term '{0}'")]
    Blacklisted(String),
    #[error("URL is {0} characters long")]
    TooLong(usize),
}

/// Ordered URL rules; the first failing rule decides.
#[derive(Debug, Clone)]
pub struct UrlValidator {
    terms: BTreeSet<String>,
    max_length: usize,
    allow_data_uris: bool,
}

impl UrlValidator {
    /// Build a validator from the default terms plus `extra_terms`.
    pub fn new<I, S>(extra_terms: I, max_length: usize, allow_data_uris: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = DEFAULT_BLACKLIST
            .iter()
            .map(|t| t.to_string())
            .chain(
                extra_terms
                    .into_iter()
                    .map(|t| t.as_ref().trim().to_lowercase()),
            )
            .filter(|t| !t.is_empty())
            .collect();

        Self {
            terms,
            max_length,
            allow_data_uris,
        }
    }

    pub fn is_acceptable(&self, url: &str) -> bool {
        self.check(url).is_ok()
    }

    /// Same as [`is_acceptable`](Self::is_acceptable), with the reason.
    pub fn check(&self, url: &str) -> Result<(), UrlRejection> {
        let url = url.trim();
        let lower = url.to_lowercase();

        let is_data = lower.starts_with("data:");
        if is_data {
            if !self.allow_data_uris || !lower.starts_with("data:image/") {
                return Err(UrlRejection::NotHttp);
            }
        } else if !is_absolute_http(&lower) {
            return Err(UrlRejection::NotHttp);
        }

        // Only the media-type header of a data URI is meaningful text.
        let haystack = if is_data {
            lower.split(',').next().unwrap_or_default()
        } else {
            lower.as_str()
        };
        if let Some(term) = self.terms.iter().find(|t| haystack.contains(t.as_str())) {
            return Err(UrlRejection::Blacklisted(term.clone()));
        }

        // Data URIs are bounded by the download size cap instead.
        if !is_data && url.len() > self.max_length {
            return Err(UrlRejection::TooLong(url.len()));
        }

        Ok(())
    }
}

fn is_absolute_http(lower: &str) -> bool {
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.is_empty() && !host.starts_with('/'))
}
