//! Repository traits for everything the background loops persist
//!
//! The loops never share memory; they talk through these traits only. Each
//! trait is implemented by [`super::SqliteStore`] for production and by
//! [`super::MemoryStore`] for tests.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐  ┌────────────────┐  ┌────────────────┐
//! │ CrawlScheduler │  │LivenessMonitor │  │ DispatchCycle  │
//! └────────────────┘  └────────────────┘  └────────────────┘
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Repository Traits                         │
//! │  CrawlerState, Heartbeat, Definition, WorkPool, Result,     │
//! │  Subscriber, Quota                                          │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                      │
//!                    ▼                      ▼
//!          ┌─────────────────┐    ┌─────────────────┐
//!          │   SqliteStore   │    │   MemoryStore   │
//!          └─────────────────┘    └─────────────────┘
//! ```

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{
    ChannelStatus, CrawlerState, HeartbeatChannel, HeartbeatRecord, NewPendingItem,
    PendingItem, Recipient, WorkDefinition, WorkItem,
};

// ============================================================================
// Repository Traits
// ============================================================================

/// Singleton crawler state
pub trait CrawlerStateRepository: Send + Sync {
    /// Load the singleton, `None` if it was never seeded
    fn load_state(&self) -> Result<Option<CrawlerState>>;

    /// Create or overwrite the singleton
    fn save_state(&self, state: &CrawlerState) -> Result<()>;

    /// Flip to Running and record the run window in one write
    fn mark_running(&self, started_at: DateTime<Utc>, next_run_time: DateTime<Utc>) -> Result<()>;

    /// Force the status back to Idle
    fn mark_idle(&self) -> Result<()>;

    /// Admin toggle for the crawl job
    fn set_switch(&self, enabled: bool) -> Result<()>;

    /// Admin change of the run frequency
    fn set_frequency(&self, hours: i64) -> Result<()>;
}

/// Per-channel heartbeat records
pub trait HeartbeatRepository: Send + Sync {
    /// Record a beat, creating the channel if needed. Sets status Up.
    fn beat(&self, channel: HeartbeatChannel, at: DateTime<Utc>) -> Result<()>;

    /// Read one channel
    fn heartbeat(&self, channel: HeartbeatChannel) -> Result<Option<HeartbeatRecord>>;

    /// Overwrite the status without touching the beat timestamp
    fn set_channel_status(&self, channel: HeartbeatChannel, status: ChannelStatus) -> Result<()>;

    /// All known channels
    fn heartbeats(&self) -> Result<Vec<HeartbeatRecord>>;
}

/// Declarative work definitions, authored by the admin side
pub trait DefinitionRepository: Send + Sync {
    /// All definitions in creation order
    fn definitions(&self) -> Result<Vec<WorkDefinition>>;

    /// Insert a definition, or replace the one with the same name in place
    fn upsert_definition(&self, definition: &WorkDefinition) -> Result<()>;

    /// Remove a definition, returns whether it existed
    fn remove_definition(&self, name: &str) -> Result<bool>;
}

/// The derived set of executable work items
pub trait WorkPoolRepository: Send + Sync {
    /// Replace the whole pool atomically; on error the previous pool stays
    fn replace_pool(&self, items: &[WorkItem]) -> Result<usize>;

    /// The pool in insertion order
    fn work_items(&self) -> Result<Vec<WorkItem>>;
}

/// Crawl results awaiting delivery
pub trait ResultRepository: Send + Sync {
    /// Store new results, ignoring any whose detail URL is already known.
    /// Returns the number actually inserted.
    fn append(&self, items: &[NewPendingItem]) -> Result<usize>;

    /// Every result not yet delivered, oldest first
    fn undelivered(&self) -> Result<Vec<PendingItem>>;

    /// Mark results delivered, returns the number updated
    fn mark_delivered(&self, ids: &[i64]) -> Result<usize>;

    /// Mark every undelivered result crawled before `cutoff` delivered
    fn sweep_stale(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Notification recipients
pub trait SubscriberRepository: Send + Sync {
    /// Enabled recipients ordered by identity
    fn subscribers(&self) -> Result<Vec<Recipient>>;

    /// Insert or replace a recipient
    fn upsert_recipient(&self, recipient: &Recipient) -> Result<()>;
}

/// Persisted per-account daily send counters.
///
/// A counter belongs to one calendar day; reading or writing it for a later
/// day starts from zero.
pub trait QuotaRepository: Send + Sync {
    /// Sends recorded for `account` on `day`
    fn sent_on(&self, account: &str, day: NaiveDate) -> Result<u32>;

    /// Record one send on `day`, returns the new count
    fn record_send(&self, account: &str, day: NaiveDate) -> Result<u32>;
}

/// Everything a full deployment needs from one backing store
pub trait Store:
    CrawlerStateRepository
    + HeartbeatRepository
    + DefinitionRepository
    + WorkPoolRepository
    + ResultRepository
    + SubscriberRepository
    + QuotaRepository
{
}

impl<T> Store for T where
    T: CrawlerStateRepository
        + HeartbeatRepository
        + DefinitionRepository
        + WorkPoolRepository
        + ResultRepository
        + SubscriberRepository
        + QuotaRepository
{
}

// ============================================================================
// Type Aliases
// ============================================================================

pub type SharedCrawlerStateRepository = Arc<dyn CrawlerStateRepository>;
pub type SharedHeartbeatRepository = Arc<dyn HeartbeatRepository>;
pub type SharedDefinitionRepository = Arc<dyn DefinitionRepository>;
pub type SharedWorkPoolRepository = Arc<dyn WorkPoolRepository>;
pub type SharedResultRepository = Arc<dyn ResultRepository>;
pub type SharedSubscriberRepository = Arc<dyn SubscriberRepository>;
pub type SharedQuotaRepository = Arc<dyn QuotaRepository>;
