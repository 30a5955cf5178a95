//! Pixiv tag search through the site's AJAX endpoints.
//!
//! Requires a logged-in `PHPSESSID` session cookie. Multi-page artworks
//! are expanded so each page becomes its own candidate.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::super::{CandidatePage, HttpClient, SourceAdapter, SourceError};
use crate::models::{Candidate, SearchRequest};

pub const DEFAULT_BASE_URL: &str = "https://www.pixiv.net";

/// Pixiv search adapter.
pub struct PixivSource {
    name: String,
    base_url: String,
    session: String,
    client: HttpClient,
}

impl PixivSource {
    /// Create the adapter. The session is attached to every API request but
    /// never stored anywhere else.
    pub fn new(
        name: &str,
        base_url: Option<&str>,
        session: Option<&str>,
        client: HttpClient,
    ) -> Result<Self, SourceError> {
        let session = session.unwrap_or_default().trim().to_string();
        let base_url = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string();

        let client = if session.is_empty() {
            client
        } else {
            client
                .with_header("cookie", &format!("PHPSESSID={}", session))?
                .with_header("referer", "https://www.pixiv.net/")?
                .with_header("accept", "application/json")?
        };

        Ok(Self {
            name: name.to_string(),
            base_url,
            session,
            client,
        })
    }

    async fn expand_artwork(&self, artwork: &SearchArtwork) -> Result<Vec<Candidate>, SourceError> {
        let Some(id) = artwork.id.as_deref() else {
            return Ok(Vec::new());
        };
        let referer = format!("https://www.pixiv.net/artworks/{}", id);
        let attribution = artwork.user_name.clone().unwrap_or_else(|| "Unknown_Artist".to_string());
        let title = artwork.title.clone().unwrap_or_else(|| format!("Artwork_{}", id));

        let base = |url: String, index: usize| {
            Candidate::new(url, self.name.as_str())
                .with_key(format!("{}_p{}", id, index))
                .with_title(title.clone())
                .with_attribution(attribution.clone())
                .with_tags(artwork.tags.clone())
                .with_referer(referer.clone())
        };

        if artwork.page_count.unwrap_or(1) > 1 {
            let url = format!("{}/ajax/illust/{}/pages", self.base_url, id);
            let pages: Vec<ArtworkPage> = parse_api(self.client.get_json(&url, &[]).await?)?;
            Ok(pages
                .into_iter()
                .enumerate()
                .filter_map(|(i, p)| {
                    let url = p.urls.original?;
                    Some(base(url, i).with_dimensions(p.width.unwrap_or(0), p.height.unwrap_or(0)))
                })
                .collect())
        } else {
            let url = format!("{}/ajax/illust/{}", self.base_url, id);
            let details: ArtworkDetails = parse_api(self.client.get_json(&url, &[]).await?)?;
            Ok(details
                .urls
                .original
                .map(|url| {
                    base(url, 0).with_dimensions(details.width.unwrap_or(0), details.height.unwrap_or(0))
                })
                .into_iter()
                .collect())
        }
    }
}

#[async_trait]
impl SourceAdapter for PixivSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), SourceError> {
        if self.session.is_empty() {
            return Err(SourceError::MissingCredential(
                "pixiv requires a PHPSESSID session cookie (--pixiv-session or IMGHARVEST_PIXIV_SESSION)".to_string(),
            ));
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
        self.validate()?;

        let url = format!(
            "{}/ajax/search/artworks/{}",
            self.base_url,
            urlencoding::encode(query)
        );
        let params = [
            ("word", query.to_string()),
            ("order", "date_d".to_string()),
            ("mode", "all".to_string()),
            ("p", page.to_string()),
            ("s_mode", "s_tag".to_string()),
            ("type", "illust_and_ugoira".to_string()),
            ("lang", "en".to_string()),
        ];

        let body: SearchBody = parse_api(self.client.get_json(&url, &params).await?)?;
        let Some(results) = body.illust_manga else {
            return Ok(CandidatePage::last());
        };

        debug!(
            "pixiv: page {} has {} artworks (total {})",
            page,
            results.data.len(),
            results.total.unwrap_or(0)
        );

        let is_last = results.is_last_page.unwrap_or(false) || results.data.is_empty();
        let mut candidates = Vec::new();
        for artwork in &results.data {
            match self.expand_artwork(artwork).await {
                Ok(found) => candidates.extend(found),
                Err(e) => warn!(
                    "pixiv: skipping artwork {}: {}",
                    artwork.id.as_deref().unwrap_or("?"),
                    e
                ),
            }
        }

        Ok(CandidatePage::new(candidates, is_last))
    }
}

// API response types

/// Unwrap the `{error, message, body}` envelope every AJAX endpoint uses.
///
/// Error responses carry `"body": []`, so the envelope is checked before
/// the body is decoded.
fn parse_api<T: DeserializeOwned>(value: Value) -> Result<T, SourceError> {
    if value.get("error").and_then(Value::as_bool).unwrap_or(false) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or("unknown error");
        return Err(SourceError::Api(message.to_string()));
    }
    let body = value
        .get("body")
        .cloned()
        .ok_or_else(|| SourceError::Parse("pixiv response has no body".to_string()))?;
    serde_json::from_value(body).map_err(|e| SourceError::Parse(format!("pixiv body: {}", e)))
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    #[serde(rename = "illustManga")]
    illust_manga: Option<SearchResults>,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(default)]
    data: Vec<SearchArtwork>,
    total: Option<u64>,
    #[serde(rename = "isLastPage")]
    is_last_page: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SearchArtwork {
    /// Missing on ad placeholder entries.
    id: Option<String>,
    title: Option<String>,
    #[serde(rename = "userName")]
    user_name: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(rename = "pageCount")]
    page_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ArtworkDetails {
    urls: ImageUrls,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ArtworkPage {
    urls: ImageUrls,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ImageUrls {
    original: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client() -> HttpClient {
        HttpClient::new("pixiv", Duration::from_secs(5), None).unwrap()
    }

    #[test]
    fn test_missing_session_is_setup_fatal() {
        let source = PixivSource::new("pixiv", None, Some("   "), client()).unwrap();
        let err = source.validate().unwrap_err();
        assert!(err.is_setup_fatal());
    }

    #[test]
    fn test_search_body_parses_ad_entries() {
        let json: Value = serde_json::from_str(
            r#"{
            "error": false,
            "body": {"illustManga": {"data": [
                {"isAdContainer": true},
                {"id": "101", "title": "t", "userName": "artist", "tags": ["a"], "pageCount": 2}
            ], "total": 2, "isLastPage": true}}
        }"#,
        )
        .unwrap();
        let body: SearchBody = parse_api(json).unwrap();
        let results = body.illust_manga.unwrap();
        assert_eq!(results.data.len(), 2);
        assert!(results.data[0].id.is_none());
        assert_eq!(results.data[1].page_count, Some(2));
        assert_eq!(results.is_last_page, Some(true));
    }

    #[test]
    fn test_api_error_surfaces_message() {
        let json: Value =
            serde_json::from_str(r#"{"error": true, "message": "login required", "body": []}"#)
                .unwrap();
        match parse_api::<SearchBody>(json) {
            Err(SourceError::Api(msg)) => assert_eq!(msg, "login required"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
