//! Candidates discovered by sources and the bytes fetched for them.

/// A URL discovered by a source adapter, not yet validated or fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Image URL (absolute http(s), or a data URI for sources that allow it).
    pub url: String,
    /// Name of the source adapter that produced this candidate.
    pub source_name: String,
    /// Stable source-side identifier (artwork id, GIF id).
    pub source_key: Option<String>,
    pub title: Option<String>,
    /// Artist or uploader name.
    pub attribution: Option<String>,
    pub tags: Vec<String>,
    pub declared_width: Option<u32>,
    pub declared_height: Option<u32>,
    /// Referer header some hosts require for hotlinked images.
    pub referer: Option<String>,
}

impl Candidate {
    /// Create a bare candidate with only URL and source set.
    pub fn new(url: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source_name: source_name.into(),
            source_key: None,
            title: None,
            attribution: None,
            tags: Vec::new(),
            declared_width: None,
            declared_height: None,
            referer: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.source_key = Some(key.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_attribution(mut self, attribution: impl Into<String>) -> Self {
        self.attribution = Some(attribution.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        if width > 0 && height > 0 {
            self.declared_width = Some(width);
            self.declared_height = Some(height);
        }
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// Key used by the metadata store: the source key if known, else the URL.
    pub fn store_key(&self) -> &str {
        self.source_key.as_deref().unwrap_or(&self.url)
    }

    /// Whether this candidate carries inline data instead of a network URL.
    pub fn is_data_uri(&self) -> bool {
        self.url.starts_with("data:")
    }
}

/// Bytes fetched for an accepted candidate.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub candidate: Candidate,
    pub bytes: Vec<u8>,
    pub content_type: String,
}
