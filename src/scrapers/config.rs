//! Per-source configuration as it appears in the config file.
//!
//! Minimum resolution and output format are set per source, with
//! defaults that depend on the source kind.

use serde::{Deserialize, Serialize};

use crate::pipeline::normalizer::{MediaPolicy, OutputFormat};
use crate::pipeline::PolicyError;

/// Which adapter implementation a source uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Pixiv,
    Giphy,
    Tenor,
    #[serde(rename = "deviantart")]
    DeviantArt,
    StaticPage,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pixiv => "pixiv",
            Self::Giphy => "giphy",
            Self::Tenor => "tenor",
            Self::DeviantArt => "deviantart",
            Self::StaticPage => "static_page",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pixiv" => Some(Self::Pixiv),
            "giphy" => Some(Self::Giphy),
            "tenor" => Some(Self::Tenor),
            "deviantart" | "deviant_art" => Some(Self::DeviantArt),
            "static_page" | "static" => Some(Self::StaticPage),
            _ => None,
        }
    }

    /// Default minimum edge length in pixels for this kind of source.
    pub fn default_min_dimension(&self) -> u32 {
        match self {
            Self::Pixiv => 100,
            Self::Giphy | Self::Tenor => 100,
            Self::DeviantArt => 500,
            Self::StaticPage => 215,
        }
    }

    /// Default output format for this kind of source.
    pub fn default_output_format(&self) -> OutputFormatConfig {
        match self {
            Self::Pixiv => OutputFormatConfig::Png,
            Self::Giphy | Self::Tenor => OutputFormatConfig::Passthrough,
            Self::DeviantArt | Self::StaticPage => OutputFormatConfig::Jpeg,
        }
    }
}

/// Output format as written in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormatConfig {
    Jpeg,
    Png,
    Passthrough,
}

/// Default JPEG quality.
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Configuration for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lower runs first.
    #[serde(default)]
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Override the API base URL (mirrors, testing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Page URLs for static page sources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormatConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jpeg_quality: Option<u8>,
    /// Accept `application/octet-stream` responses as possible images.
    #[serde(default)]
    pub allow_octet_stream: bool,
    #[serde(default)]
    pub allow_data_uris: bool,
    /// Extra blacklist terms for this source.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blacklist: Vec<String>,
    /// Topic variants tried after the bare topic is exhausted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topic_modifiers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

fn default_true() -> bool {
    true
}

impl SourceConfig {
    /// Minimal enabled config for a kind, everything else defaulted.
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            enabled: true,
            priority: 0,
            api_key: None,
            base_url: None,
            urls: Vec::new(),
            min_width: None,
            min_height: None,
            output_format: None,
            jpeg_quality: None,
            allow_octet_stream: false,
            allow_data_uris: false,
            blacklist: Vec::new(),
            topic_modifiers: Vec::new(),
            user_agent: None,
        }
    }

    /// Build the media policy for this source, validating ranges.
    pub fn media_policy(&self) -> Result<MediaPolicy, PolicyError> {
        let min = self.kind.default_min_dimension();
        let format = match self.output_format.unwrap_or_else(|| self.kind.default_output_format()) {
            OutputFormatConfig::Jpeg => OutputFormat::Jpeg {
                quality: self.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            OutputFormatConfig::Png => OutputFormat::Png,
            OutputFormatConfig::Passthrough => OutputFormat::Passthrough,
        };
        MediaPolicy::new(
            self.min_width.unwrap_or(min),
            self.min_height.unwrap_or(min),
            format,
        )
    }
}
