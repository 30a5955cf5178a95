//! The fetch → filter → dedup → convert → persist pipeline.
//!
//! Each stage lives in its own module and can be used on its own; the
//! [`orchestrator`] wires them together and owns all per-run state.

pub mod dedup;
pub mod downloader;
pub mod normalizer;
pub mod orchestrator;
pub mod stats;
pub mod validator;

pub use dedup::{content_hash, DedupKey, Deduplicator};
pub use downloader::{DownloadError, Downloader};
pub use normalizer::{MediaPolicy, NormalizedImage, Normalizer, OutputFormat, Rejection};
pub use orchestrator::{Orchestrator, RunState, SourceEntry};
pub use stats::{
    AbortReason, CandidateOutcome, PipelineEvent, RejectReason, RunOutcome, RunReport, SourceTally,
};
pub use validator::{UrlRejection, UrlValidator, DEFAULT_BLACKLIST};

use std::time::Duration;

use thiserror::Error;

use crate::scrapers::SourceError;

/// Default cap on a single download (50 MiB).
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Default bound on candidate URL length.
pub const DEFAULT_MAX_URL_LENGTH: usize = 1000;

/// Out-of-range values rejected when building pipeline configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("jpeg quality must be within 1..=100, got {0}")]
    JpegQuality(u8),

    #[error("max download bytes must be at least 1")]
    ZeroMaxBytes,

    #[error("max URL length must be at least 1")]
    ZeroUrlLength,

    #[error("request timeout must be non-zero")]
    ZeroTimeout,

    #[error("delay range is inverted: min {min_ms}ms > max {max_ms}ms")]
    DelayRange { min_ms: u64, max_ms: u64 },

    #[error("consecutive failure limit must be at least 1")]
    ZeroFailureLimit,

    #[error("empty page limit must be at least 1")]
    ZeroEmptyPageLimit,
}

/// Errors that stop a run before it starts.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no sources are enabled")]
    NoSources,

    #[error("source '{name}' cannot run: {error}")]
    Setup {
        name: String,
        #[source]
        error: SourceError,
    },

    #[error("source '{name}' has an invalid media policy: {error}")]
    Policy {
        name: String,
        #[source]
        error: PolicyError,
    },

    #[error("cannot prepare output directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Run-wide limits and pacing, validated at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    request_timeout: Duration,
    max_download_bytes: u64,
    max_url_length: usize,
    delay_min: Duration,
    delay_max: Duration,
    page_delay: Duration,
    max_consecutive_failures: u32,
    empty_page_limit: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            max_url_length: DEFAULT_MAX_URL_LENGTH,
            delay_min: Duration::from_millis(300),
            delay_max: Duration::from_millis(4000),
            page_delay: Duration::from_millis(1500),
            max_consecutive_failures: 25,
            empty_page_limit: 3,
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn max_download_bytes(&self) -> u64 {
        self.max_download_bytes
    }

    pub fn max_url_length(&self) -> usize {
        self.max_url_length
    }

    /// Politeness delay range between candidate downloads.
    pub fn delay_range(&self) -> (Duration, Duration) {
        (self.delay_min, self.delay_max)
    }

    pub fn page_delay(&self) -> Duration {
        self.page_delay
    }

    pub fn max_consecutive_failures(&self) -> u32 {
        self.max_consecutive_failures
    }

    pub fn empty_page_limit(&self) -> u32 {
        self.empty_page_limit
    }
}

/// Builder for [`PipelineConfig`]; `build` validates every field.
#[derive(Debug, Clone)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn max_download_bytes(mut self, bytes: u64) -> Self {
        self.config.max_download_bytes = bytes;
        self
    }

    pub fn max_url_length(mut self, len: usize) -> Self {
        self.config.max_url_length = len;
        self
    }

    pub fn delay_range(mut self, min: Duration, max: Duration) -> Self {
        self.config.delay_min = min;
        self.config.delay_max = max;
        self
    }

    pub fn page_delay(mut self, delay: Duration) -> Self {
        self.config.page_delay = delay;
        self
    }

    pub fn max_consecutive_failures(mut self, limit: u32) -> Self {
        self.config.max_consecutive_failures = limit;
        self
    }

    pub fn empty_page_limit(mut self, limit: u32) -> Self {
        self.config.empty_page_limit = limit;
        self
    }

    /// No pacing at all.
    pub fn no_delays(self) -> Self {
        self.delay_range(Duration::ZERO, Duration::ZERO)
            .page_delay(Duration::ZERO)
    }

    pub fn build(self) -> Result<PipelineConfig, PolicyError> {
        let c = self.config;
        if c.request_timeout.is_zero() {
            return Err(PolicyError::ZeroTimeout);
        }
        if c.max_download_bytes == 0 {
            return Err(PolicyError::ZeroMaxBytes);
        }
        if c.max_url_length == 0 {
            return Err(PolicyError::ZeroUrlLength);
        }
        if c.delay_min > c.delay_max {
            return Err(PolicyError::DelayRange {
                min_ms: c.delay_min.as_millis() as u64,
                max_ms: c.delay_max.as_millis() as u64,
            });
        }
        if c.max_consecutive_failures == 0 {
            return Err(PolicyError::ZeroFailureLimit);
        }
        if c.empty_page_limit == 0 {
            return Err(PolicyError::ZeroEmptyPageLimit);
        }
        Ok(c)
    }
}
