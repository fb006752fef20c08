//! Remote chapter content access.
//!
//! The scheduler never talks to the network directly. Each chapter fetch goes
//! through a [`BookClient`], so tests and embedding applications can plug in
//! their own transport. [`HttpBookClient`] is the stock implementation: it
//! reads chapter bodies from an HTTP gateway in front of the blob store, with
//! the content locator as the object path.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use url::Url;

/// Fetches raw chapter content
///
/// Implementations must be safe to call concurrently; one book fans out into
/// several simultaneous calls.
#[async_trait]
pub trait BookClient: Send + Sync {
    /// Fetch the text behind `content_locator` for the given book
    async fn fetch_chapter_content(
        &self,
        internal_book_id: &str,
        content_locator: &str,
    ) -> Result<String>;
}

/// [`BookClient`] over an HTTP blob gateway
///
/// `GET {base_url}/{content_locator}` must return the chapter text. Any
/// non-success status is an error; 5xx and 429 are reported as
/// [`Error::Network`] so the retry layer treats them as transient.
#[derive(Clone, Debug)]
pub struct HttpBookClient {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpBookClient {
    /// Create a client for the gateway at `base_url`
    pub fn new(base_url: &str, config: &ClientConfig) -> Result<Self> {
        let mut base_url = Url::parse(base_url).map_err(|e| Error::Config {
            message: format!("invalid base_url {:?}: {}", base_url, e),
            key: Some("base_url".to_string()),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config {
                message: format!("base_url {} cannot be used as a base", base_url),
                key: Some("base_url".to_string()),
            });
        }
        // Locators are appended as path segments; drop a trailing empty one
        if let Ok(mut segments) = base_url.path_segments_mut() {
            segments.pop_if_empty();
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("bookdl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// Create a client from [`ClientConfig`], which must carry a `base_url`
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let base_url = config.base_url.as_deref().ok_or_else(|| Error::Config {
            message: "base_url is required for the HTTP client".to_string(),
            key: Some("base_url".to_string()),
        })?;
        Self::new(base_url, config)
    }

    /// URL of the object behind `content_locator`
    ///
    /// Each `/`-separated part of the locator becomes one percent-encoded
    /// path segment.
    pub fn chapter_url(&self, content_locator: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Other(format!("base URL {} has no path", self.base_url)))?
            .extend(
                content_locator
                    .trim_start_matches('/')
                    .split('/')
                    .map(|segment| urlencoding::decode(segment).unwrap_or_else(|_| segment.into())),
            );
        Ok(url)
    }
}

#[async_trait]
impl BookClient for HttpBookClient {
    async fn fetch_chapter_content(
        &self,
        internal_book_id: &str,
        content_locator: &str,
    ) -> Result<String> {
        let url = self.chapter_url(content_locator)?;
        tracing::debug!(book_id = internal_book_id, %url, "Fetching chapter content");

        let response = self.http_client.get(url).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!(
                "chapter object {} of book {}",
                content_locator, internal_book_id
            )));
        }
        if !status.is_success() {
            tracing::debug!(
                book_id = internal_book_id,
                status = status.as_u16(),
                "Chapter gateway returned an error status"
            );
        }
        let response = response.error_for_status()?;

        Ok(response.text().await?)
    }
}
