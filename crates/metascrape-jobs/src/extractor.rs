//! HTTP page fetcher and HTML metadata parser.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{redirect, Client};
use scraper::{Html, Selector};
use tracing::{debug, warn};

use metascrape_core::{defaults, Error, ExtractionResult, MetadataExtractor, Result};

/// Configuration for [`HttpExtractor`].
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Bound on the whole request, body included.
    pub timeout: Duration,
    pub user_agent: String,
    pub max_redirects: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(defaults::FETCH_TIMEOUT_SECS),
            user_agent: defaults::FETCH_USER_AGENT.to_string(),
            max_redirects: defaults::FETCH_MAX_REDIRECTS,
        }
    }
}

impl ExtractorConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `FETCH_TIMEOUT_SECS` | `5` | Per-URL fetch timeout |
    pub fn from_env() -> Self {
        let timeout_secs = std::env::var("FETCH_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(defaults::FETCH_TIMEOUT_SECS);
        Self::default().with_timeout(Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Fetches pages over HTTP and parses title, description and keywords.
#[derive(Clone)]
pub struct HttpExtractor {
    client: Client,
    timeout: Duration,
}

impl HttpExtractor {
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .redirect(redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            timeout: config.timeout,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(ExtractorConfig::default())
    }

    async fn fetch(&self, url: &str) -> std::result::Result<String, reqwest::Error> {
        let response = self.client.get(url).send().await?;
        debug!(
            subsystem = "extractor",
            op = "fetch",
            url,
            http_status = response.status().as_u16(),
            "Fetched page"
        );
        response.text().await
    }

    fn describe(&self, err: &reqwest::Error) -> String {
        if err.is_timeout() {
            format!("Request timed out after {}s", self.timeout.as_secs_f64())
        } else if err.is_connect() {
            format!("Connection failed: {}", root_cause(err))
        } else if err.is_builder() {
            format!("Invalid URL: {}", root_cause(err))
        } else {
            err.to_string()
        }
    }
}

#[async_trait]
impl MetadataExtractor for HttpExtractor {
    async fn extract(&self, url: &str) -> ExtractionResult {
        let start = Instant::now();
        match self.fetch(url).await {
            Ok(body) => parse_metadata(url, &body),
            Err(err) => {
                let cause = self.describe(&err);
                warn!(
                    subsystem = "extractor",
                    op = "extract",
                    url,
                    error = %cause,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Extraction failed"
                );
                ExtractionResult::failure(url, cause)
            }
        }
    }
}

/// Innermost error in the source chain, which carries the useful detail
/// (e.g. "Connection refused").
fn root_cause(err: &(dyn std::error::Error + 'static)) -> String {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

/// Parse an HTML document into a successful [`ExtractionResult`].
///
/// Missing elements yield empty strings; malformed markup is parsed leniently.
pub fn parse_metadata(url: &str, html: &str) -> ExtractionResult {
    let document = Html::parse_document(html);
    ExtractionResult::success(
        url,
        first_text(&document, "title").unwrap_or_default(),
        meta_content(&document, "description").unwrap_or_default(),
        meta_content(&document, "keywords").unwrap_or_default(),
    )
}

fn first_text(document: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>())
}

fn meta_content(document: &Html, name: &str) -> Option<String> {
    let selector = Selector::parse(&format!(r#"meta[name="{name}"]"#)).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(str::to_string)
}
