//! Configuration management for tidings
//!
//! Configuration is loaded from a TOML file or from `TIDINGS_*` environment
//! variables. Every section falls back to its defaults, so a file only needs
//! to name what it changes.
//!
//! ```toml
//! [dispatch]
//! daily_limit = 30
//!
//! [[dispatch.accounts]]
//! identity = "alerts@example.com"
//! credential = "app-password"
//! host = "smtp.example.com"
//!
//! [[crawler.targets]]
//! name = "siteA"
//! search_url = "https://site-a.example/search?q={keyword}"
//! item_selector = "ul.results li"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Crawl scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Heartbeat and watchdog configuration
    pub liveness: LivenessConfig,

    /// Notification dispatch configuration
    pub dispatch: DispatchConfig,

    /// Crawler configuration
    pub crawler: CrawlerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Crawl scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between polls of the crawler state (at most 60)
    pub poll_interval_secs: u64,

    /// Seconds to back off after a failed iteration
    pub failure_backoff_secs: u64,

    /// Frequency used when `init` seeds the crawler state
    pub default_frequency_hours: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            failure_backoff_secs: 60,
            default_frequency_hours: 2,
        }
    }
}

/// Heartbeat and watchdog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Seconds between heartbeat writes
    pub publish_interval_secs: u64,

    /// Seconds between watchdog checks
    pub check_interval_secs: u64,

    /// Heartbeat age, in seconds, beyond which recovery fires
    pub timeout_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            publish_interval_secs: 30,
            check_interval_secs: 30,
            timeout_secs: 60,
        }
    }
}

/// Notification dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Seconds between dispatch cycles
    pub cycle_interval_secs: u64,

    /// Undelivered items older than this many hours are swept
    pub retention_hours: i64,

    /// Default per-account daily send limit
    pub daily_limit: u32,

    /// Connection attempts per account per cycle
    pub connect_attempts: u32,

    /// Seconds to pause between connection attempts
    pub connect_retry_delay_secs: u64,

    /// Timeout in seconds for SMTP connect and send
    pub smtp_timeout_secs: u64,

    /// Display name used in the From header
    pub sender_name: String,

    /// Outbound accounts in rotation order
    pub accounts: Vec<AccountConfig>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 600,
            retention_hours: 24,
            daily_limit: 30,
            connect_attempts: 3,
            connect_retry_delay_secs: 2,
            smtp_timeout_secs: 10,
            sender_name: String::from("tidings"),
            accounts: Vec::new(),
        }
    }
}

/// One outbound SMTP account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Sender address, also the SMTP login
    pub identity: String,

    /// SMTP password or app token
    pub credential: String,

    /// SMTP relay host
    pub host: String,

    /// SMTP port
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Upgrade the connection with STARTTLS
    #[serde(default = "default_true")]
    pub starttls: bool,

    /// Overrides [`DispatchConfig::daily_limit`] for this account
    #[serde(default)]
    pub daily_limit: Option<u32>,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

/// Crawler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Rate limit (requests per second)
    pub rate_limit: u32,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Retries for retryable fetch failures
    pub max_retries: u32,

    /// Selector-driven targets, one work unit each
    pub targets: Vec<TargetConfig>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            rate_limit: 2,
            request_timeout_secs: 30,
            max_retries: 3,
            targets: Vec::new(),
        }
    }
}

/// How to scrape one target site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Target name as used in work definitions
    pub name: String,

    /// Search URL with a `{keyword}` placeholder
    pub search_url: String,

    /// Selector matching one result entry
    pub item_selector: String,

    /// Selector for the title inside an entry; the entry text when absent
    #[serde(default)]
    pub title_selector: Option<String>,

    /// Selector for the link inside an entry; the first `a[href]` when absent
    #[serde(default)]
    pub link_selector: Option<String>,

    /// Selector for the publish date inside an entry
    #[serde(default)]
    pub date_selector: Option<String>,

    /// Selector for the publisher inside an entry
    #[serde(default)]
    pub publisher_selector: Option<String>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/tidings.db"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A single outbound account may be given through `TIDINGS_SMTP_*`;
    /// anything richer belongs in a config file.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse("TIDINGS_POLL_INTERVAL") {
            config.scheduler.poll_interval_secs = v;
        }
        if let Some(v) = env_parse("TIDINGS_FAILURE_BACKOFF") {
            config.scheduler.failure_backoff_secs = v;
        }
        if let Some(v) = env_parse("TIDINGS_HEARTBEAT_INTERVAL") {
            config.liveness.publish_interval_secs = v;
        }
        if let Some(v) = env_parse("TIDINGS_WATCHDOG_INTERVAL") {
            config.liveness.check_interval_secs = v;
        }
        if let Some(v) = env_parse("TIDINGS_LIVENESS_TIMEOUT") {
            config.liveness.timeout_secs = v;
        }
        if let Some(v) = env_parse("TIDINGS_DISPATCH_INTERVAL") {
            config.dispatch.cycle_interval_secs = v;
        }
        if let Some(v) = env_parse("TIDINGS_RETENTION_HOURS") {
            config.dispatch.retention_hours = v;
        }
        if let Some(v) = env_parse("TIDINGS_DAILY_LIMIT") {
            config.dispatch.daily_limit = v;
        }
        if let Some(v) = env_parse("TIDINGS_RATE_LIMIT") {
            config.crawler.rate_limit = v;
        }
        if let Some(v) = env_parse("TIDINGS_REQUEST_TIMEOUT") {
            config.crawler.request_timeout_secs = v;
        }

        if let (Ok(identity), Ok(credential), Ok(host)) = (
            std::env::var("TIDINGS_SMTP_USER"),
            std::env::var("TIDINGS_SMTP_PASSWORD"),
            std::env::var("TIDINGS_SMTP_HOST"),
        ) {
            config.dispatch.accounts.push(AccountConfig {
                identity,
                credential,
                host,
                port: env_parse("TIDINGS_SMTP_PORT").unwrap_or_else(default_smtp_port),
                starttls: env_parse("TIDINGS_SMTP_STARTTLS").unwrap_or(true),
                daily_limit: None,
            });
        }

        if let Ok(path) = std::env::var("TIDINGS_SQLITE_PATH") {
            config.database.sqlite_path = path.into();
        }
        if let Ok(level) = std::env::var("TIDINGS_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("TIDINGS_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.poll_interval_secs == 0 || self.scheduler.poll_interval_secs > 60 {
            anyhow::bail!("scheduler.poll_interval_secs must be between 1 and 60");
        }

        if self.scheduler.default_frequency_hours < 1 {
            anyhow::bail!("scheduler.default_frequency_hours must be at least 1");
        }

        if self.liveness.publish_interval_secs == 0 || self.liveness.check_interval_secs == 0 {
            anyhow::bail!("liveness intervals must be greater than 0");
        }

        if self.liveness.timeout_secs <= self.liveness.publish_interval_secs {
            anyhow::bail!("liveness.timeout_secs must exceed liveness.publish_interval_secs");
        }

        if self.dispatch.cycle_interval_secs == 0 {
            anyhow::bail!("dispatch.cycle_interval_secs must be greater than 0");
        }

        if self.dispatch.retention_hours < 1 {
            anyhow::bail!("dispatch.retention_hours must be at least 1");
        }

        if self.dispatch.connect_attempts == 0 {
            anyhow::bail!("dispatch.connect_attempts must be greater than 0");
        }

        let mut identities = HashSet::new();
        for account in &self.dispatch.accounts {
            if !identities.insert(account.identity.as_str()) {
                anyhow::bail!("duplicate outbound account '{}'", account.identity);
            }
        }

        if self.crawler.rate_limit == 0 {
            anyhow::bail!("crawler.rate_limit must be greater than 0");
        }

        let mut names = HashSet::new();
        for target in &self.crawler.targets {
            if !names.insert(target.name.as_str()) {
                anyhow::bail!("duplicate crawler target '{}'", target.name);
            }
            if !target.search_url.contains("{keyword}") {
                anyhow::bail!(
                    "crawler target '{}' search_url has no {{keyword}} placeholder",
                    target.name
                );
            }
        }

        Ok(())
    }

    /// Get the scheduler poll interval as Duration
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.poll_interval_secs)
    }

    /// Get the scheduler failure backoff as Duration
    #[must_use]
    pub fn failure_backoff(&self) -> Duration {
        Duration::from_secs(self.scheduler.failure_backoff_secs)
    }

    /// Get the dispatch cycle interval as Duration
    #[must_use]
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch.cycle_interval_secs)
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.crawler.request_timeout_secs)
    }
}
