pub mod admin;
pub mod service;

use std::sync::Arc;

use anyhow::{Context, Result};

use tidings::config::Config;
use tidings::storage::SqliteStore;

// Re-export command functions for convenience
pub use admin::{init, load, remove, schedule, status, sync};
pub use service::{crawl, dispatch, run, watch};

/// Open the configured SQLite database, creating it when missing
pub fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.database.sqlite_path).with_context(|| {
        format!(
            "Failed to open database at {}",
            config.database.sqlite_path.display()
        )
    })?;
    Ok(Arc::new(store))
}
