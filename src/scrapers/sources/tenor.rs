//! Tenor v2 GIF search.
//!
//! Tenor paginates with an opaque `next` token, so the adapter remembers
//! the token that leads to each page index it has already reached.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::super::{CandidatePage, HttpClient, SourceAdapter, SourceError};
use crate::models::{Candidate, SearchRequest};

pub const DEFAULT_BASE_URL: &str = "https://tenor.googleapis.com";

const PAGE_SIZE: u32 = 50;

/// Media formats tried in order of preference.
const FORMATS: [&str; 3] = ["gif", "mediumgif", "tinygif"];

pub struct TenorSource {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: HttpClient,
    /// (query, page) -> `pos` token that fetches that page.
    cursors: Mutex<HashMap<(String, u32), String>>,
}

impl TenorSource {
    pub fn new(name: &str, base_url: Option<&str>, api_key: Option<&str>, client: HttpClient) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
            api_key: api_key.map(str::trim).filter(|k| !k.is_empty()).map(String::from),
            client,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Token for `page`. When an earlier page failed its token was never
    /// learned, so resume from the closest page reached before it, or from
    /// the start (`None`).
    fn position_for(&self, query: &str, page: u32) -> Option<String> {
        let cursors = self.cursors.lock().ok()?;
        (2..=page)
            .rev()
            .find_map(|p| cursors.get(&(query.to_string(), p)).cloned())
    }

    fn remember_position(&self, query: &str, page: u32, pos: String) {
        if let Ok(mut cursors) = self.cursors.lock() {
            cursors.insert((query.to_string(), page), pos);
        }
    }

    fn to_candidate(&self, result: TenorResult) -> Option<Candidate> {
        let media = FORMATS
            .iter()
            .find_map(|key| result.media_formats.get(*key).filter(|m| !m.url.is_empty()))?;

        let (width, height) = match media.dims.as_slice() {
            [w, h, ..] => (*w, *h),
            _ => (0, 0),
        };

        let mut candidate = Candidate::new(media.url.clone(), self.name.as_str())
            .with_key(result.id.clone())
            .with_dimensions(width, height)
            .with_tags(result.tags.clone());
        let title = result
            .content_description
            .or(result.title)
            .filter(|t| !t.trim().is_empty());
        if let Some(title) = title {
            candidate = candidate.with_title(title);
        }
        Some(candidate)
    }
}

#[async_trait]
impl SourceAdapter for TenorSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), SourceError> {
        if self.api_key.is_none() {
            return Err(SourceError::MissingCredential(format!(
                "source '{}' needs an api_key",
                self.name
            )));
        }
        Ok(())
    }

    async fn fetch_page(
        &self,
        _request: &SearchRequest,
        query: &str,
        page: u32,
        _count_needed: usize,
    ) -> Result<CandidatePage, SourceError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(SourceError::MissingCredential(format!(
                "source '{}' needs an api_key",
                self.name
            )));
        };

        let pos = self.position_for(query, page);
        if page > 1 && pos.is_none() {
            debug!("tenor: no cursor for page {} of '{}', starting over", page, query);
        }

        let url = format!("{}/v2/search", self.base_url);
        let mut params = vec![
            ("key", api_key.to_string()),
            ("q", query.to_string()),
            ("limit", PAGE_SIZE.to_string()),
            ("contentfilter", "medium".to_string()),
        ];
        if let Some(pos) = pos {
            params.push(("pos", pos));
        }

        let response: TenorSearchResponse = self.client.get_json(&url, &params).await?;
        let next = response.next.filter(|n| !n.is_empty() && n != "0");
        let is_last = next.is_none() || response.results.is_empty();
        if let Some(next) = next {
            self.remember_position(query, page + 1, next);
        }

        let candidates = response
            .results
            .into_iter()
            .filter_map(|r| self.to_candidate(r))
            .collect();
        Ok(CandidatePage::new(candidates, is_last))
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct TenorSearchResponse {
    #[serde(default)]
    results: Vec<TenorResult>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TenorResult {
    id: String,
    title: Option<String>,
    content_description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    media_formats: HashMap<String, TenorMedia>,
}

#[derive(Debug, Deserialize)]
struct TenorMedia {
    #[serde(default)]
    url: String,
    #[serde(default)]
    dims: Vec<u32>,
}
