//! Selector-driven crawling with rate limiting
//!
//! One [`Fetcher`] is shared by every configured target. Each target becomes a
//! [`SelectorSpider`] registered under its name, so work items naming that
//! target resolve to it.

pub mod fetcher;
pub mod selector;

use std::sync::Arc;

use tracing::info;

use crate::config::CrawlerConfig;
use crate::error::Result;
use crate::scheduler::work::WorkUnitRegistry;

pub use fetcher::Fetcher;
pub use selector::{parse_date, SelectorSpider};

/// Build the work unit registry from the configured targets
pub fn build_registry(config: &CrawlerConfig) -> Result<WorkUnitRegistry> {
    let fetcher = Arc::new(Fetcher::new(config)?);
    let mut registry = WorkUnitRegistry::new();

    for target in &config.targets {
        let spider = SelectorSpider::new(target, fetcher.clone())?;
        registry.register(Arc::new(spider));
    }

    info!(targets = ?registry.names(), "Work units registered");
    Ok(registry)
}
