//! HTTP fetch primitive used by the extractor and listing sources.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::FetchError;
use crate::retry::{RetryAction, RetryPolicy, retry_with_backoff};

pub const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// A single GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub timeout: Duration,
    /// Page that embeds the requested resource; sent as `Referer` and `Origin`.
    pub referer: Option<String>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            referer: None,
        }
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    /// URL after redirects.
    pub final_url: String,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        (**self).fetch(request).await
    }
}

/// [`Fetcher`] backed by a shared `reqwest::Client`.
///
/// Every request carries the browser-like default headers; many listing and
/// embed hosts refuse requests without a realistic `User-Agent`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    headers: HeaderMap,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static(DEFAULT_UA),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        // Accept-Encoding is left to reqwest so it can decompress transparently.

        Self { client, headers }
    }

    /// Build a fetcher with a fresh client that follows redirects.
    pub fn with_default_client() -> Result<Self, FetchError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self::new(client))
    }

    pub fn set_user_agent(&mut self, user_agent: &str) {
        self.add_header(reqwest::header::USER_AGENT.as_str(), user_agent);
    }

    /// Insert an arbitrary header. Invalid names or values are skipped.
    pub fn add_header<K: AsRef<str>, V: AsRef<str>>(&mut self, key: K, value: V) {
        match HeaderName::from_str(key.as_ref()) {
            Ok(name) => match HeaderValue::from_str(value.as_ref()) {
                Ok(value) => {
                    self.headers.insert(name, value);
                }
                Err(e) => {
                    debug!(error = %e, "Invalid header value; skipping");
                }
            },
            Err(e) => {
                debug!(error = %e, "Invalid header name; skipping");
            }
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn request_headers(&self, request: &FetchRequest) -> HeaderMap {
        let mut headers = self.headers.clone();
        let Some(referer) = request.referer.as_deref() else {
            return headers;
        };

        if let Ok(value) = HeaderValue::from_str(referer) {
            headers.insert(reqwest::header::REFERER, value);
        }
        if let Ok(url) = Url::parse(referer)
            && let Ok(value) = HeaderValue::from_str(&url.origin().ascii_serialization())
        {
            headers.insert(reqwest::header::ORIGIN, value);
        }
        headers
    }
}

fn parse_http_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw).map_err(|e| FetchError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(FetchError::InvalidUrl(format!(
            "{raw}: unsupported scheme {other}"
        ))),
    }
}

fn classify(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_connect() {
        FetchError::Connect(e.to_string())
    } else {
        FetchError::Http(e)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = parse_http_url(&request.url)?;
        let response = self
            .client
            .get(url)
            .headers(self.request_headers(request))
            .timeout(request.timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(classify)?;
        debug!(url = %request.url, status, bytes = body.len(), "Fetched");

        Ok(FetchResponse {
            status,
            final_url,
            body,
        })
    }
}

/// 408, 429 and 5xx are worth repeating.
pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

/// Composes a [`RetryPolicy`] around another fetcher.
pub struct RetryingFetcher {
    inner: Arc<dyn Fetcher>,
    policy: RetryPolicy,
    token: CancellationToken,
}

impl RetryingFetcher {
    pub fn new(inner: Arc<dyn Fetcher>, policy: RetryPolicy, token: CancellationToken) -> Self {
        Self {
            inner,
            policy,
            token,
        }
    }
}

#[async_trait]
impl Fetcher for RetryingFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let inner = &self.inner;
        retry_with_backoff(&self.policy, &self.token, move |_attempt| async move {
            match inner.fetch(request).await {
                Ok(response) if is_retryable_status(response.status) => {
                    RetryAction::Retry(FetchError::Status(response.status))
                }
                Ok(response) => RetryAction::Success(response),
                Err(e) if e.is_transient() => RetryAction::Retry(e),
                Err(e) => RetryAction::Fail(e),
            }
        })
        .await
    }
}
