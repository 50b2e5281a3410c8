//! Error types for the crawler side of tidings

use thiserror::Error;

/// Errors that can occur during HTTP fetching operations
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Maximum retry attempts exceeded
    #[error("Gave up after {attempts} attempts: {last}")]
    MaxRetriesExceeded { attempts: u32, last: String },

    /// Content decoding error
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ServerError(status) => matches!(status, 429 | 500 | 502 | 503 | 504),
            Self::Timeout => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

/// Errors raised by work units while crawling one work item
#[derive(Error, Debug)]
pub enum CrawlerError {
    /// Fetch error
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// A configured CSS selector does not parse
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// The search URL template could not be expanded
    #[error("Invalid search URL for target '{target}': {reason}")]
    InvalidSearchUrl { target: String, reason: String },
}
