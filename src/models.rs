//! Core data structures shared by the scheduler, the synchronizer and the
//! dispatcher.
//!
//! Every record here maps onto one persisted table (see
//! [`crate::storage::sqlite`]) and travels between loops only through the
//! store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Crawler state
// ============================================================================

/// Execution status of the crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
}

impl RunStatus {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" | "0" => Ok(Self::Idle),
            "running" | "1" => Ok(Self::Running),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Singleton record that drives the crawl scheduler.
///
/// `switch` and `frequency_hours` are owned by the admin side; the scheduler
/// only ever writes `status`, `last_run_time` and `next_run_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlerState {
    pub switch: bool,
    pub frequency_hours: i64,
    pub status: RunStatus,
    pub last_run_time: Option<DateTime<Utc>>,
    pub next_run_time: Option<DateTime<Utc>>,
}

impl CrawlerState {
    /// A fresh state: enabled, never run, due immediately.
    pub fn new(frequency_hours: i64) -> Self {
        Self {
            switch: true,
            frequency_hours,
            status: RunStatus::Idle,
            last_run_time: None,
            next_run_time: None,
        }
    }

    /// Whether a run is due at `now`. A state that never ran is always due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.next_run_time {
            None => true,
            Some(next) => now >= next,
        }
    }
}

// ============================================================================
// Heartbeats
// ============================================================================

/// Subsystems that publish a heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatChannel {
    Crawl,
    Dispatch,
}

impl HeartbeatChannel {
    pub const ALL: [HeartbeatChannel; 2] = [Self::Crawl, Self::Dispatch];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crawl => "crawl",
            Self::Dispatch => "dispatch",
        }
    }
}

impl fmt::Display for HeartbeatChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness as last reported for a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Up,
    Down,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl FromStr for ChannelStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" | "1" => Ok(Self::Up),
            "down" | "0" => Ok(Self::Down),
            other => Err(format!("unknown channel status '{other}'")),
        }
    }
}

/// Persisted heartbeat for one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub channel: HeartbeatChannel,
    pub last_beat: DateTime<Utc>,
    pub status: ChannelStatus,
}

// ============================================================================
// Work definitions and work items
// ============================================================================

/// Declarative crawl definition authored by a user.
///
/// The synchronizer expands every definition into `keywords x targets`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkDefinition {
    pub name: String,
    pub keywords: Vec<String>,
    pub targets: Vec<String>,
    #[serde(default)]
    pub source_urls: Vec<String>,
    pub category: String,
    #[serde(default)]
    pub owner: Option<String>,
}

/// Identity of an executable work item: trimmed keyword and target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkKey {
    pub keyword: String,
    pub target: String,
}

impl WorkKey {
    pub fn new(keyword: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.keyword, self.target)
    }
}

/// One executable (keyword, target) pair with its merged provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub key: WorkKey,
    pub definitions: BTreeSet<String>,
    pub category: String,
}

// ============================================================================
// Results and recipients
// ============================================================================

/// A crawl result waiting to be delivered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingItem {
    pub id: i64,
    pub category: String,
    pub definitions: Vec<String>,
    pub keyword: String,
    pub target: String,
    pub title: String,
    pub detail_url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub publisher: Option<String>,
    pub crawled_at: DateTime<Utc>,
    pub delivered: bool,
}

/// A crawl result produced by a work unit, before it is stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPendingItem {
    pub category: String,
    pub definitions: Vec<String>,
    pub keyword: String,
    pub target: String,
    pub title: String,
    pub detail_url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub publisher: Option<String>,
    pub crawled_at: DateTime<Utc>,
}

/// A subscriber receiving notifications for a set of categories
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub identity: String,
    pub address: String,
    pub categories: BTreeSet<String>,
    pub enabled: bool,
}

impl Recipient {
    /// Whether an item of `category` should reach this recipient
    pub fn subscribes_to(&self, category: &str) -> bool {
        self.categories.contains(category)
    }
}
