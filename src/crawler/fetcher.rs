//! HTTP fetcher with rate limiting and charset detection
//!
//! Every work unit shares one [`Fetcher`]. It provides:
//! - User-Agent rotation
//! - Rate limiting with governor
//! - Retry with exponential backoff on 429, 5xx and transport failures
//! - Charset detection from the Content-Type header or a meta tag, with a
//!   GB18030 fallback for legacy Chinese pages

use crate::config::CrawlerConfig;
use crate::utils::error::FetchError;
use crate::utils::retry::{with_retry_if, RetryConfig};
use encoding_rs::{Encoding, GB18030, UTF_8};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use rand::seq::SliceRandom;
use regex::Regex;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, REFERER, USER_AGENT},
    Client, Response,
};
use std::num::NonZeroU32;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// Pool of realistic User-Agent strings for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

fn charset_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"(?i)charset\s*=\s*["']?([a-z0-9_\-]+)"#).ok())
        .as_ref()
}

/// Shared page fetcher
pub struct Fetcher {
    /// HTTP client with configured timeout and compression
    client: Client,

    /// Rate limiter to control request frequency
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,

    retry: RetryConfig,
}

impl Fetcher {
    /// Create a fetcher from the crawler section
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn new(config: &CrawlerConfig) -> Result<Self, FetchError> {
        Self::with_retry(
            config.rate_limit,
            Duration::from_secs(config.request_timeout_secs),
            RetryConfig::with_delays(config.max_retries + 1, 1000, 30_000),
        )
    }

    /// Create a fetcher with an explicit retry policy
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn with_retry(
        requests_per_second: u32,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).gzip(true).build()?;

        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
            retry,
        })
    }

    /// Fetch a page, waiting for the rate limiter before every attempt
    ///
    /// # Errors
    ///
    /// Non-retryable statuses are returned as is. Retryable failures that
    /// outlast the retry budget come back as `FetchError::MaxRetriesExceeded`.
    pub async fn fetch(&self, url: &str, referer: Option<&str>) -> Result<String, FetchError> {
        let attempts = self.retry.max_attempts.max(1);

        let result = with_retry_if(
            &self.retry,
            || async move {
                self.rate_limiter.until_ready().await;
                self.fetch_once(url, referer).await
            },
            FetchError::is_retryable,
        )
        .await;

        match result {
            Err(e) if e.is_retryable() => Err(FetchError::MaxRetriesExceeded {
                attempts,
                last: e.to_string(),
            }),
            other => other,
        }
    }

    async fn fetch_once(&self, url: &str, referer: Option<&str>) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .headers(self.build_headers(referer))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::ServerError(status.as_u16()));
        }

        debug!(url, status = status.as_u16(), "Page fetched");
        self.decode_response(response).await
    }

    async fn decode_response(&self, response: Response) -> Result<String, FetchError> {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_default();

        let bytes = response.bytes().await?;
        self.decode_bytes(&bytes, &content_type)
    }

    /// Decode a body to a string.
    ///
    /// Tries, in order: the Content-Type charset, strict UTF-8, a meta charset
    /// in the first kilobyte, then GB18030.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Decode` if no strategy decodes cleanly
    pub fn decode_bytes(&self, bytes: &[u8], content_type: &str) -> Result<String, FetchError> {
        if let Some(encoding) = Self::declared_encoding(content_type) {
            return Self::decode_with(encoding, bytes);
        }

        if let Ok(text) = Self::decode_with(UTF_8, bytes) {
            return Ok(text);
        }

        let head = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]);
        if let Some(encoding) = Self::declared_encoding(&head) {
            if let Ok(text) = Self::decode_with(encoding, bytes) {
                return Ok(text);
            }
        }

        Self::decode_with(GB18030, bytes)
            .map_err(|_| FetchError::Decode("Failed to decode content with any known charset".to_string()))
    }

    fn declared_encoding(text: &str) -> Option<&'static Encoding> {
        charset_pattern()?
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|label| Encoding::for_label(label.as_str().as_bytes()))
    }

    fn decode_with(encoding: &'static Encoding, bytes: &[u8]) -> Result<String, FetchError> {
        let (cow, _encoding, had_errors) = encoding.decode(bytes);

        if had_errors {
            return Err(FetchError::Decode(format!(
                "{} decoding errors",
                encoding.name()
            )));
        }

        Ok(cow.into_owned())
    }

    fn build_headers(&self, referer: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();

        headers.insert(USER_AGENT, HeaderValue::from_static(self.random_user_agent()));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7"),
        );

        if let Some(value) = referer.and_then(|r| HeaderValue::from_str(r).ok()) {
            headers.insert(REFERER, value);
        }

        headers
    }

    fn random_user_agent(&self) -> &'static str {
        let mut rng = rand::thread_rng();
        USER_AGENTS.choose(&mut rng).copied().unwrap_or(USER_AGENTS[0])
    }
}
