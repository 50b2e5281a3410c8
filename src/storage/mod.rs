//! Persistence for crawler state, heartbeats, definitions, the work pool,
//! results, recipients and quota counters.
//!
//! [`SqliteStore`] is the production backend; [`MemoryStore`] mirrors it for
//! tests. Both implement every trait in [`repository`].

pub mod memory;
pub mod repository;
pub mod sqlite;

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

pub use memory::MemoryStore;
pub use repository::*;
pub use sqlite::SqliteStore;

use crate::models::CrawlerState;

/// Fixed-width RFC 3339 so stored timestamps also compare as text
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    anyhow::bail!("unrecognized timestamp '{raw}'")
}

/// Create the crawler state singleton if it does not exist yet.
///
/// Returns `true` when a record was created.
pub fn seed_state<R>(repo: &R, frequency_hours: i64) -> Result<bool>
where
    R: CrawlerStateRepository + ?Sized,
{
    if repo.load_state()?.is_some() {
        return Ok(false);
    }
    repo.save_state(&CrawlerState::new(frequency_hours.max(1)))?;
    tracing::info!(frequency_hours, "Seeded crawler state");
    Ok(true)
}
