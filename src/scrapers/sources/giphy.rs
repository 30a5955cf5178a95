//! Giphy GIF search.
//!
//! [Giphy API Documentation](https://developers.giphy.com/docs/api)

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::super::{CandidatePage, HttpClient, SourceAdapter, SourceError};
use crate::models::{Candidate, SearchRequest};

pub const DEFAULT_BASE_URL: &str = "https://api.giphy.com";

/// Results per request. Fixed so page offsets stay stable across calls.
const PAGE_SIZE: u32 = 50;

/// Renditions tried in order of preference.
const RENDITIONS: [&str; 3] = ["original", "fixed_height", "downsized_large"];

pub struct GiphySource {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: HttpClient,
}

impl GiphySource {
    pub fn new(name: &str, base_url: Option<&str>, api_key: Option<&str>, client: HttpClient) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
            api_key: api_key.map(str::trim).filter(|k| !k.is_empty()).map(String::from),
            client,
        }
    }

    fn to_candidate(&self, gif: GiphyGif) -> Option<Candidate> {
        let (url, width, height) = RENDITIONS.iter().find_map(|key| {
            let image = gif.images.get(*key)?;
            let url = image.url.clone().filter(|u| !u.is_empty())?;
            Some((url, parse_dim(&image.width), parse_dim(&image.height)))
        })?;

        let mut candidate = Candidate::new(url, self.name.as_str())
            .with_key(gif.id)
            .with_dimensions(width, height);
        if let Some(title) = gif.title.filter(|t| !t.trim().is_empty()) {
            candidate = candidate.with_title(title);
        }
        if let Some(user) = gif.username.filter(|u| !u.trim().is_empty()) {
            candidate = candidate.with_attribution(user);
        }
        Some(candidate)
    }
}

#[async_trait]
impl SourceAdapter for GiphySource {
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

        let offset = page.saturating_sub(1) * PAGE_SIZE;
        let url = format!("{}/v1/gifs/search", self.base_url);
        let params = [
            ("api_key", api_key.to_string()),
            ("q", query.to_string()),
            ("limit", PAGE_SIZE.to_string()),
            ("offset", offset.to_string()),
            ("rating", "g".to_string()),
            ("lang", "en".to_string()),
        ];

        let response: GiphySearchResponse = self.client.get_json(&url, &params).await?;
        let returned = response.data.len() as u64;
        let is_last = match &response.pagination {
            Some(p) => returned == 0 || p.offset + p.count.max(returned) >= p.total_count,
            None => returned == 0,
        };
        debug!("giphy: offset {} returned {} results", offset, returned);

        let candidates = response
            .data
            .into_iter()
            .filter_map(|gif| self.to_candidate(gif))
            .collect();
        Ok(CandidatePage::new(candidates, is_last))
    }
}

/// Giphy sends dimensions as strings.
fn parse_dim(value: &Option<String>) -> u32 {
    value.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0)
}

// API response types

#[derive(Debug, Deserialize)]
struct GiphySearchResponse {
    #[serde(default)]
    data: Vec<GiphyGif>,
    pagination: Option<GiphyPagination>,
}

#[derive(Debug, Deserialize)]
struct GiphyGif {
    id: String,
    title: Option<String>,
    username: Option<String>,
    #[serde(default)]
    images: std::collections::HashMap<String, GiphyImage>,
}

#[derive(Debug, Deserialize)]
struct GiphyImage {
    url: Option<String>,
    width: Option<String>,
    height: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GiphyPagination {
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    count: u64,
    #[serde(default)]
    offset: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn source() -> GiphySource {
        let client = HttpClient::new("giphy", Duration::from_secs(5), None).unwrap();
        GiphySource::new("giphy", None, Some("key"), client)
    }

    #[test]
    fn test_prefers_original_rendition() {
        let gif: GiphyGif = serde_json::from_str(
            r#"{
                "id": "abc",
                "title": "Dancing Cat",
                "username": "",
                "images": {
                    "fixed_height": {"url": "https://media.giphy.com/fh.gif", "width": "200", "height": "200"},
                    "original": {"url": "https://media.giphy.com/orig.gif", "width": "480", "height": "270"}
                }
            }"#,
        )
        .unwrap();

        let candidate = source().to_candidate(gif).unwrap();
        assert_eq!(candidate.url, "https://media.giphy.com/orig.gif");
        assert_eq!(candidate.declared_width, Some(480));
        assert_eq!(candidate.source_key.as_deref(), Some("abc"));
        assert!(candidate.attribution.is_none());
    }

    #[test]
    fn test_falls_back_when_original_missing() {
        let gif: GiphyGif = serde_json::from_str(
            r#"{"id": "x", "images": {"downsized_large": {"url": "https://media.giphy.com/d.gif"}}}"#,
        )
        .unwrap();
        let candidate = source().to_candidate(gif).unwrap();
        assert_eq!(candidate.url, "https://media.giphy.com/d.gif");
        assert_eq!(candidate.declared_width, None);
    }

    #[test]
    fn test_missing_key_is_setup_fatal() {
        let client = HttpClient::new("giphy", Duration::from_secs(5), None).unwrap();
        let source = GiphySource::new("giphy", None, Some(" "), client);
        assert!(source.validate().unwrap_err().is_setup_fatal());
    }
}
