//! Timed HTTP fetcher.
//!
//! ### Contract
//! - GET, or POST with a JSON body and `Content-Type: application/json`
//! - Fixed request timeout (default 60s)
//! - 2xx: body parsed as JSON, falling back to raw text
//! - non-2xx: resolves to "no data", not an error
//! - abort, network error or timeout: `Error::Transport`
//!
//! The [`Fetcher`] trait is the seam the orchestrator, the push manager and
//! the background tasks depend on; [`FetchClient`] is the reqwest-backed
//! implementation and [`CachingFetcher`] adds response caching on top.

pub mod caching;
pub mod url;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde_json::Value;
use std::time::{Duration, Instant};

pub use caching::CachingFetcher;
pub use url::{BOOK_FIELDS, BOOK_PATH, RequestKey, UrlError, request_key};

use shelf_core::{AppConfig, Error};

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "shelf/0.1")
    pub user_agent: String,

    /// Request timeout (default: 60s)
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { user_agent: "shelf/0.1".to_string(), timeout: Duration::from_secs(60) }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self { user_agent: config.user_agent.clone(), timeout: config.timeout() }
    }
}

/// Result of a completed request.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// 2xx with a JSON body.
    Json(Value),
    /// 2xx with a body that is not JSON.
    Text(String),
    /// Non-2xx completion.
    NoData { status: u16 },
}

impl FetchOutcome {
    /// Classify a completed response from its status and body.
    pub fn from_parts(status: StatusCode, body: &[u8]) -> Self {
        if !status.is_success() {
            return FetchOutcome::NoData { status: status.as_u16() };
        }
        match serde_json::from_slice(body) {
            Ok(value) => FetchOutcome::Json(value),
            Err(_) => FetchOutcome::Text(String::from_utf8_lossy(body).into_owned()),
        }
    }

    /// The JSON body, if the request succeeded with one.
    pub fn json(&self) -> Option<&Value> {
        match self {
            FetchOutcome::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Whether the request completed with a 2xx status.
    pub fn is_success(&self) -> bool {
        !matches!(self, FetchOutcome::NoData { .. })
    }
}

/// Performs network requests.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url`.
    async fn get(&self, url: &str) -> Result<FetchOutcome, Error>;

    /// POST `body` as JSON to `url`.
    async fn post_json(&self, url: &str, body: &Value) -> Result<FetchOutcome, Error>;
}

/// reqwest-backed fetcher.
#[derive(Debug, Clone)]
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    async fn execute(&self, request: reqwest::RequestBuilder, method: &str, url: &str) -> Result<FetchOutcome, Error> {
        let start = Instant::now();

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;

        let outcome = FetchOutcome::from_parts(status, &bytes);

        tracing::debug!(
            "{} {} -> {} in {}ms ({} bytes)",
            method,
            url,
            status.as_u16(),
            start.elapsed().as_millis(),
            bytes.len()
        );

        Ok(outcome)
    }

    fn transport_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Transport(format!("timed out after {}ms", self.config.timeout.as_millis()))
        } else {
            Error::Transport(format!("network error: {}", err))
        }
    }
}

#[async_trait]
impl Fetcher for FetchClient {
    async fn get(&self, url: &str) -> Result<FetchOutcome, Error> {
        let request = self.http.get(url).header(header::ACCEPT, "application/json, text/plain;q=0.9, */*;q=0.8");
        self.execute(request, "GET", url).await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<FetchOutcome, Error> {
        let request = self
            .http
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_string());
        self.execute(request, "POST", url).await
    }
}
