//! Configuration management for imgharvest using the prefer crate.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::{PipelineConfig, PolicyError, DEFAULT_MAX_DOWNLOAD_BYTES, DEFAULT_MAX_URL_LENGTH};
use crate::scrapers::config::SourceConfig;
use crate::scrapers::http_client::DEFAULT_USER_AGENT;
use crate::scrapers::retry::{Backoff, RetryConfigError, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory (metadata store lives here).
    pub data_dir: PathBuf,
    /// Images land in `<output_root>/<topic>/`.
    pub output_root: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// User agent for HTTP requests.
    pub user_agent: String,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    pub max_download_bytes: u64,
    pub max_url_length: usize,
    /// Politeness delay range between downloads, in milliseconds.
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
    /// Delay between result pages in milliseconds.
    pub page_delay_ms: u64,
    pub max_consecutive_failures: u32,
    /// Attempts per request, including the first.
    pub retry_attempts: u32,
    /// Consecutive empty pages before a source counts as exhausted.
    pub empty_page_limit: u32,
    /// Configured sources by name.
    pub sources: BTreeMap<String, SourceConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        // ~/.local/share/imgharvest for bookkeeping, ~/Pictures/imgharvest for images
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("imgharvest");
        let output_root = dirs::picture_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("imgharvest");

        let pipeline = PipelineConfig::default();
        let (delay_min, delay_max) = pipeline.delay_range();

        Self {
            data_dir,
            output_root,
            database_filename: "imgharvest.db".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: pipeline.request_timeout().as_secs(),
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            max_url_length: DEFAULT_MAX_URL_LENGTH,
            delay_min_ms: delay_min.as_millis() as u64,
            delay_max_ms: delay_max.as_millis() as u64,
            page_delay_ms: pipeline.page_delay().as_millis() as u64,
            max_consecutive_failures: pipeline.max_consecutive_failures(),
            retry_attempts: RetryPolicy::default().max_attempts(),
            empty_page_limit: pipeline.empty_page_limit(),
            sources: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Get the full path to the database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(&self.output_root)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validated pipeline limits.
    pub fn pipeline_config(&self) -> Result<PipelineConfig, PolicyError> {
        PipelineConfig::builder()
            .request_timeout(self.request_timeout())
            .max_download_bytes(self.max_download_bytes)
            .max_url_length(self.max_url_length)
            .delay_range(
                Duration::from_millis(self.delay_min_ms),
                Duration::from_millis(self.delay_max_ms),
            )
            .page_delay(Duration::from_millis(self.page_delay_ms))
            .max_consecutive_failures(self.max_consecutive_failures)
            .empty_page_limit(self.empty_page_limit)
            .build()
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, RetryConfigError> {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_secs(1),
            Backoff::Exponential,
            0.25,
        )
    }

    /// Enabled sources in run order (priority, then name).
    pub fn enabled_sources(&self) -> Vec<(&str, &SourceConfig)> {
        let mut sources: Vec<_> = self
            .sources
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(name, c)| (name.as_str(), c))
            .collect();
        sources.sort_by_key(|(_, c)| c.priority);
        sources
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target directory for data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Root directory for downloaded images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Database filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_download_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_url_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_min_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_max_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_consecutive_failures: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_page_limit: Option<u32>,
    /// Source configurations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, SourceConfig>,

    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate.
    /// Automatically discovers imgharvest config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("imgharvest").await {
            Ok(pref_config) => {
                let target: Option<String> = pref_config.get("target").await.ok();
                let output: Option<String> = pref_config.get("output").await.ok();
                let database: Option<String> = pref_config.get("database").await.ok();
                let user_agent: Option<String> = pref_config.get("user_agent").await.ok();
                let request_timeout: Option<u64> = pref_config.get("request_timeout").await.ok();
                let max_download_bytes: Option<u64> =
                    pref_config.get("max_download_bytes").await.ok();
                let max_url_length: Option<usize> = pref_config.get("max_url_length").await.ok();
                let delay_min_ms: Option<u64> = pref_config.get("delay_min_ms").await.ok();
                let delay_max_ms: Option<u64> = pref_config.get("delay_max_ms").await.ok();
                let page_delay_ms: Option<u64> = pref_config.get("page_delay_ms").await.ok();
                let max_consecutive_failures: Option<u32> =
                    pref_config.get("max_consecutive_failures").await.ok();
                let retry_attempts: Option<u32> = pref_config.get("retry_attempts").await.ok();
                let empty_page_limit: Option<u32> =
                    pref_config.get("empty_page_limit").await.ok();
                let sources: BTreeMap<String, SourceConfig> =
                    pref_config.get("sources").await.unwrap_or_default();

                let source_path = pref_config.source_path().cloned();

                Config {
                    target,
                    output,
                    database,
                    user_agent,
                    request_timeout,
                    max_download_bytes,
                    max_url_length,
                    delay_min_ms,
                    delay_max_ms,
                    page_delay_ms,
                    max_consecutive_failures,
                    retry_attempts,
                    empty_page_limit,
                    sources,
                    source_path,
                }
            }
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path. `.toml` files are
    /// parsed as TOML, everything else as JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path).await?;
        let mut config = Self::parse(&contents, path)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
        if is_toml {
            Ok(toml::from_str(contents)?)
        } else {
            Ok(serde_json::from_str(contents)?)
        }
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// Absolute paths are kept, `~` is expanded, anything else is joined
    /// onto `base_dir`.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref target) = self.target {
            settings.data_dir = self.resolve_path(target, base_dir);
        }
        if let Some(ref output) = self.output {
            settings.output_root = self.resolve_path(output, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = user_agent.clone();
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout_secs = timeout;
        }
        if let Some(bytes) = self.max_download_bytes {
            settings.max_download_bytes = bytes;
        }
        if let Some(len) = self.max_url_length {
            settings.max_url_length = len;
        }
        if let Some(ms) = self.delay_min_ms {
            settings.delay_min_ms = ms;
        }
        if let Some(ms) = self.delay_max_ms {
            settings.delay_max_ms = ms;
        }
        if let Some(ms) = self.page_delay_ms {
            settings.page_delay_ms = ms;
        }
        if let Some(limit) = self.max_consecutive_failures {
            settings.max_consecutive_failures = limit;
        }
        if let Some(attempts) = self.retry_attempts {
            settings.retry_attempts = attempts;
        }
        if let Some(limit) = self.empty_page_limit {
            settings.empty_page_limit = limit;
        }
        for (name, source) in &self.sources {
            settings.sources.insert(name.clone(), source.clone());
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Use CWD for relative paths instead of config file directory.
    pub use_cwd: bool,
    /// Override data directory (--data-dir flag).
    pub data_dir: Option<PathBuf>,
    /// Override output root (--output flag).
    pub output_root: Option<PathBuf>,
}

/// Load settings with explicit options.
///
/// An explicit config path that cannot be read or parsed is an error;
/// a missing auto-discovered config just means defaults.
pub async fn load_settings_with_options(options: LoadOptions) -> Result<Settings, ConfigError> {
    let config = match &options.config_path {
        Some(path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };

    let mut settings = Settings::default();

    let cwd = || std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let base_dir = if options.use_cwd {
        cwd()
    } else {
        config.base_dir().unwrap_or_else(cwd)
    };

    config.apply_to_settings(&mut settings, &base_dir);

    if let Some(data_dir) = options.data_dir {
        settings.data_dir = data_dir;
    }
    if let Some(output_root) = options.output_root {
        settings.output_root = output_root;
    }

    Ok(settings)
}
