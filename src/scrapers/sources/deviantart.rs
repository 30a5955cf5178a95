//! DeviantArt search through its public HTML pages.
//!
//! A search results page lists links to artwork pages; each artwork page
//! is then fetched to find the full-size image. Pages are numbered by the
//! site itself, so there is no explicit last page: an empty results page
//! counts towards the cursor's empty-page limit instead.

use std::collections::HashSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use super::super::{CandidatePage, HttpClient, SourceAdapter, SourceError};
use crate::models::{Candidate, SearchRequest};

pub const DEFAULT_BASE_URL: &str = "https://www.deviantart.com";

/// Path fragments of CDN images that are not artwork.
const NON_ART_PATTERNS: [&str; 7] = [
    "/avatars/",
    "/icons/",
    "/emoticons/",
    "/thumbs/",
    "thumbnail",
    "icon",
    "avatar",
];

/// Resize segments the CDN inserts into preview URLs.
const RESIZE_SEGMENTS: [&str; 4] = ["/200H/", "/250/", "/400T/", "/300W/"];

/// Images at least this wide are taken as artwork on pages without markers.
const MIN_ART_WIDTH: u32 = 500;

pub struct DeviantArtSource {
    name: String,
    base_url: String,
    client: HttpClient,
}

impl DeviantArtSource {
    pub fn new(name: &str, base_url: Option<&str>, client: HttpClient) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
            client,
        }
    }

    fn search_url(&self, query: &str, page: u32) -> String {
        format!(
            "{}/search?q={}&page={}",
            self.base_url,
            urlencoding::encode(query),
            page
        )
    }

    /// Fetch one artwork page and turn its images into candidates.
    async fn expand_artwork(&self, link: &ArtworkLink) -> Result<Vec<Candidate>, SourceError> {
        let html = self.client.get_text(link.url.as_str()).await?;
        let artwork = extract_artwork(&html, &link.url);
        if artwork.images.is_empty() {
            debug!("{}: no image found on {}", self.name, link.url);
        }

        let many = artwork.images.len() > 1;
        let candidates = artwork
            .images
            .into_iter()
            .enumerate()
            .map(|(i, url)| {
                let key = if many {
                    format!("{}_{}", link.id, i)
                } else {
                    link.id.clone()
                };
                let mut candidate = Candidate::new(url, self.name.as_str())
                    .with_key(key)
                    .with_attribution(link.artist.clone())
                    .with_referer(link.url.to_string());
                if let Some(title) = &artwork.title {
                    candidate = candidate.with_title(title.clone());
                }
                candidate
            })
            .collect();
        Ok(candidates)
    }
}

#[async_trait]
impl SourceAdapter for DeviantArtSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), SourceError> {
        Url::parse(&self.base_url)
            .map_err(|e| SourceError::Config(format!("invalid base url '{}': {}", self.base_url, e)))?;
        Ok(())
    }

    async fn fetch_page(
        &self,
        _request: &SearchRequest,
        query: &str,
        page: u32,
        _count_needed: usize,
    ) -> Result<CandidatePage, SourceError> {
        let search_url = self.search_url(query, page);
        let base = Url::parse(&search_url)
            .map_err(|e| SourceError::Config(format!("invalid search url '{}': {}", search_url, e)))?;
        let html = self.client.get_text(&search_url).await?;

        let links = extract_artwork_links(&html, &base);
        debug!("{}: {} artworks on page {} for '{}'", self.name, links.len(), page, query);

        let mut candidates = Vec::new();
        for link in &links {
            match self.expand_artwork(link).await {
                Ok(found) => candidates.extend(found),
                Err(e) if e.is_setup_fatal() => return Err(e),
                Err(e) => warn!("{}: skipping {}: {}", self.name, link.url, e),
            }
        }

        Ok(CandidatePage::new(candidates, false))
    }
}

/// An artwork page found in search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtworkLink {
    pub url: Url,
    /// Numeric id from the end of the slug, or the whole slug.
    pub id: String,
    pub artist: String,
}

impl ArtworkLink {
    /// Parse `/<artist>/art/<slug>` links; anything else is `None`.
    fn parse(url: Url) -> Option<Self> {
        let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
        let [artist, "art", slug, ..] = segments.as_slice() else {
            return None;
        };
        let id = slug
            .rsplit('-')
            .next()
            .filter(|tail| !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(*slug)
            .to_string();
        let artist = artist.to_string();
        Some(Self { url, id, artist })
    }
}

/// Collect artwork links from a search results page, in page order
/// without repeats. Links must stay on the search page's host or on
/// `deviantart.com`.
pub fn extract_artwork_links(html: &str, base: &Url) -> Vec<ArtworkLink> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for a in document.select(&selector) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let Ok(mut url) = base.join(href.trim()) else {
            continue;
        };
        url.set_fragment(None);
        url.set_query(None);

        let host = url.host_str().unwrap_or_default();
        let on_site = host == base.host_str().unwrap_or_default() || host.ends_with("deviantart.com");
        if !on_site {
            continue;
        }
        if let Some(link) = ArtworkLink::parse(url) {
            if seen.insert(link.url.clone()) {
                links.push(link);
            }
        }
    }
    links
}

/// What an artwork page offers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artwork {
    pub title: Option<String>,
    pub images: Vec<String>,
}

static STD_VARIANT_RE: OnceLock<Option<Regex>> = OnceLock::new();
static CONTENT_PATH_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn std_variant_regex() -> Option<&'static Regex> {
    STD_VARIANT_RE
        .get_or_init(|| Regex::new(r"/v\d+/.*?/").ok())
        .as_ref()
}

fn content_path_regex() -> Option<&'static Regex> {
    CONTENT_PATH_RE
        .get_or_init(|| Regex::new(r"/f/|/intermediary/|/pre\d+/").ok())
        .as_ref()
}

/// Strip CDN resize segments to reach the full-size file.
fn full_size(url: &str) -> String {
    RESIZE_SEGMENTS
        .iter()
        .fold(url.to_string(), |acc, seg| acc.replace(seg, "/"))
}

fn select_all<'a>(document: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => document.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

fn resolve(base: &Url, raw: &str) -> Option<String> {
    let url = base.join(raw.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// Find the artwork image(s) on an artwork page.
///
/// The download button wins, then the standard deviation image, then
/// full-view images, then CDN images that look like content.
pub fn extract_artwork(html: &str, page: &Url) -> Artwork {
    let document = Html::parse_document(html);

    let title = select_all(&document, r#"h1[data-hook="deviation_title"]"#)
        .first()
        .map(|h| h.text().collect::<String>().trim().to_string())
        .or_else(|| {
            select_all(&document, r#"meta[property="og:title"]"#)
                .first()
                .and_then(|m| m.value().attr("content"))
                .map(|c| c.trim().to_string())
        })
        .filter(|t| !t.is_empty());

    let download = select_all(&document, r#"a[data-hook="download_button"]"#)
        .into_iter()
        .find_map(|a| a.value().attr("href").and_then(|h| resolve(page, h)));
    if let Some(url) = download {
        return Artwork {
            title,
            images: vec![url],
        };
    }

    let standard = select_all(&document, r#"img[data-hook="deviation_std_img"]"#)
        .into_iter()
        .find_map(|img| img.value().attr("src").and_then(|s| resolve(page, s)));
    if let Some(url) = standard {
        let url = match std_variant_regex() {
            Some(re) => re.replace(&url, "/f/").into_owned(),
            None => url,
        };
        return Artwork {
            title,
            images: vec![full_size(&url)],
        };
    }

    let mut elements = select_all(&document, "img.dev-content-full, img.dev-content-normal, img.fullview");
    if elements.is_empty() {
        elements = select_all(&document, "img")
            .into_iter()
            .filter(|img| {
                let src = img.value().attr("src").unwrap_or_default();
                let lower = src.to_lowercase();
                let on_cdn = lower.contains("deviantart") || lower.contains("wixmp.com");
                if !on_cdn || NON_ART_PATTERNS.iter().any(|p| lower.contains(p)) {
                    return false;
                }
                let wide = img
                    .value()
                    .attr("width")
                    .and_then(|w| w.trim().parse::<u32>().ok())
                    .is_some_and(|w| w >= MIN_ART_WIDTH);
                wide || content_path_regex().is_some_and(|re| re.is_match(src))
            })
            .collect();
    }

    let mut seen = HashSet::new();
    let images = elements
        .into_iter()
        .filter_map(|img| {
            let el = img.value();
            el.attr("src").or_else(|| el.attr("data-src"))
        })
        .filter_map(|src| resolve(page, src))
        .map(|url| full_size(&url))
        .filter(|url| seen.insert(url.clone()))
        .collect();

    Artwork { title, images }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_base() -> Url {
        Url::parse("https://www.deviantart.com/search?q=dragons&page=1").unwrap()
    }

    fn art_page() -> Url {
        Url::parse("https://www.deviantart.com/painter/art/Red-Dragon-987654").unwrap()
    }

    #[test]
    fn test_extracts_artwork_links() {
        let html = r##"
            <a href="https://www.deviantart.com/painter/art/Red-Dragon-987654#comments">one</a>
            <a href="/painter/art/Red-Dragon-987654">again</a>
            <a href="/sketcher/art/untitled">two</a>
            <a href="/painter/gallery">gallery</a>
            <a href="https://elsewhere.example/x/art/Fake-1">offsite</a>
        "##;

        let links = extract_artwork_links(html, &search_base());
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].id, "987654");
        assert_eq!(links[0].artist, "painter");
        assert_eq!(
            links[0].url.as_str(),
            "https://www.deviantart.com/painter/art/Red-Dragon-987654"
        );
        assert_eq!(links[1].id, "untitled");
    }

    #[test]
    fn test_download_button_wins() {
        let html = r#"
            <h1 data-hook="deviation_title">Red Dragon</h1>
            <a data-hook="download_button" href="https://images-wixmp.example/f/full.png?token=t">Download</a>
            <img data-hook="deviation_std_img" src="https://images-wixmp.example/v1/fill/w_400/preview.jpg">
        "#;

        let art = extract_artwork(html, &art_page());
        assert_eq!(art.title.as_deref(), Some("Red Dragon"));
        assert_eq!(art.images, vec!["https://images-wixmp.example/f/full.png?token=t"]);
    }

    #[test]
    fn test_standard_image_is_upsized() {
        let html = r#"
            <meta property="og:title" content="Blue Dragon">
            <img data-hook="deviation_std_img"
                 src="https://images-wixmp.example/f/abc/v1/fill/w_1024/art.jpg">
        "#;

        let art = extract_artwork(html, &art_page());
        assert_eq!(art.title.as_deref(), Some("Blue Dragon"));
        assert_eq!(art.images, vec!["https://images-wixmp.example/f/abc/f/w_1024/art.jpg"]);
    }

    #[test]
    fn test_falls_back_to_cdn_images() {
        let html = r#"
            <img src="https://a.deviantart.net/avatars/p/painter.png" width="800">
            <img src="https://images-wixmp.com/intermediary/f/abc/art.jpg">
            <img src="https://images-wixmp.com/misc/wide.jpg" width="640">
            <img src="https://images-wixmp.com/misc/small.jpg" width="120">
            <img src="https://cdn.other.example/f/unrelated.jpg">
        "#;

        let art = extract_artwork(html, &art_page());
        assert_eq!(
            art.images,
            vec![
                "https://images-wixmp.com/intermediary/f/abc/art.jpg",
                "https://images-wixmp.com/misc/wide.jpg",
            ]
        );
    }

    #[test]
    fn test_full_size_strips_resize_segments() {
        assert_eq!(
            full_size("https://cdn.example/300W/art/200H/x.jpg"),
            "https://cdn.example/art/x.jpg"
        );
    }
}
