//! Concrete source adapters and the factory that builds them from config.

pub mod deviantart;
pub mod giphy;
pub mod pixiv;
pub mod static_page;
pub mod tenor;

pub use deviantart::DeviantArtSource;
pub use giphy::GiphySource;
pub use pixiv::PixivSource;
pub use static_page::StaticPageSource;
pub use tenor::TenorSource;

use std::sync::Arc;
use std::time::Duration;

use super::config::{SourceConfig, SourceKind};
use super::http_client::HttpClient;
use super::retry::{RetryPolicy, Sleeper, TokioSleeper};
use super::{SourceAdapter, SourceError};

/// Shared runtime inputs for building adapters.
#[derive(Clone)]
pub struct AdapterContext {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub retry: RetryPolicy,
    pub sleeper: Arc<dyn Sleeper>,
    /// Pixiv `PHPSESSID`, supplied at runtime only.
    pub pixiv_session: Option<String>,
}

impl Default for AdapterContext {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            pixiv_session: None,
        }
    }
}

/// Build the adapter for a configured source.
///
/// Construction never touches the network; credential problems surface
/// later through [`SourceAdapter::validate`].
pub fn build_adapter(
    name: &str,
    config: &SourceConfig,
    ctx: &AdapterContext,
) -> Result<Box<dyn SourceAdapter>, SourceError> {
    let user_agent = config.user_agent.as_deref().or(ctx.user_agent.as_deref());
    let client = HttpClient::new(name, ctx.timeout, user_agent)?
        .with_retry(ctx.retry.clone(), ctx.sleeper.clone());
    let base_url = config.base_url.as_deref();

    let adapter: Box<dyn SourceAdapter> = match config.kind {
        SourceKind::Pixiv => Box::new(PixivSource::new(
            name,
            base_url,
            ctx.pixiv_session.as_deref(),
            client,
        )?),
        SourceKind::Giphy => Box::new(GiphySource::new(
            name,
            base_url,
            config.api_key.as_deref(),
            client,
        )),
        SourceKind::Tenor => Box::new(TenorSource::new(
            name,
            base_url,
            config.api_key.as_deref(),
            client,
        )),
        SourceKind::DeviantArt => Box::new(DeviantArtSource::new(name, base_url, client)),
        SourceKind::StaticPage => Box::new(StaticPageSource::new(
            name,
            config.urls.clone(),
            config.allow_data_uris,
            client,
        )),
    };
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_adapter_uses_config_name() {
        let mut config = SourceConfig::new(SourceKind::Giphy);
        config.api_key = Some("key".to_string());

        let adapter = build_adapter("gifs", &config, &AdapterContext::default()).unwrap();
        assert_eq!(adapter.name(), "gifs");
        assert!(adapter.validate().is_ok());
    }

    #[test]
    fn test_pixiv_without_session_fails_validation() {
        let config = SourceConfig::new(SourceKind::Pixiv);
        let adapter = build_adapter("pixiv", &config, &AdapterContext::default()).unwrap();
        assert!(adapter.validate().unwrap_err().is_setup_fatal());
    }

    #[test]
    fn test_deviantart_needs_no_credentials() {
        let config = SourceConfig::new(SourceKind::DeviantArt);
        let adapter = build_adapter("da", &config, &AdapterContext::default()).unwrap();
        assert!(adapter.validate().is_ok());
    }

    #[test]
    fn test_static_page_without_urls_fails_validation() {
        let config = SourceConfig::new(SourceKind::StaticPage);
        let adapter = build_adapter("pages", &config, &AdapterContext::default()).unwrap();
        assert!(adapter.validate().is_err());
    }
}
