//! tidings - keyword watch and notification service
//!
//! Periodically scrapes configured sites for configured keywords and mails
//! what it finds to the recipients subscribed to each category.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Core data structures and types
//! - [`storage`] - Repository traits with SQLite and in-memory stores
//! - [`fanout`] - Expansion of work definitions into the work pool
//! - [`scheduler`] - The crawl loop and pluggable work units
//! - [`crawler`] - Rate-limited fetcher and selector-driven work unit
//! - [`dispatch`] - Account pool, mail transport and the dispatch loop
//! - [`liveness`] - Heartbeat publishers and watchdogs
//! - [`runtime`] - Task wiring and shutdown
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tidings::config::Config;
//! use tidings::runtime::Components;
//! use tidings::storage::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(SqliteStore::open(&config.database.sqlite_path)?);
//!     let services = tidings::runtime::start(store, &config, Components::ALL)?;
//!     tokio::signal::ctrl_c().await?;
//!     services.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod dispatch;
pub mod error;
pub mod fanout;
pub mod liveness;
pub mod models;
pub mod runtime;
pub mod scheduler;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::dispatch::{DispatchCycle, DispatchReport, ResourcePool};
    pub use crate::error::{Error, ErrorCategory, Result, TidingsErrorTrait};
    pub use crate::fanout::{PoolSynchronizer, SyncReport};
    pub use crate::liveness::{HeartbeatPublisher, RecoveryAction, Verdict, Watchdog};
    pub use crate::models::{
        CrawlerState, HeartbeatChannel, PendingItem, Recipient, WorkDefinition, WorkItem,
    };
    pub use crate::scheduler::work::{WorkParameters, WorkUnit, WorkUnitRegistry};
    pub use crate::scheduler::{CrawlScheduler, CycleReport, PollOutcome};
    pub use crate::storage::{MemoryStore, SqliteStore, Store};
}

// Direct re-exports for convenience
pub use models::{CrawlerState, PendingItem, Recipient, WorkDefinition, WorkItem};
