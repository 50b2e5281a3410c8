//! SQLite-backed store
//!
//! One connection guarded by a `Mutex`, WAL journaling so a watchdog process
//! can read while the loops write. List-valued columns hold JSON arrays.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::repository::{
    CrawlerStateRepository, DefinitionRepository, HeartbeatRepository, QuotaRepository,
    ResultRepository, SubscriberRepository, WorkPoolRepository,
};
use super::{format_timestamp, parse_timestamp};
use crate::models::{
    ChannelStatus, CrawlerState, HeartbeatChannel, HeartbeatRecord, NewPendingItem,
    PendingItem, Recipient, RunStatus, WorkDefinition, WorkItem, WorkKey,
};

/// SQLite implementation of every repository trait
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection mutex poisoned"))
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS crawler_state (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    switch INTEGER NOT NULL DEFAULT 1,
                    frequency_hours INTEGER NOT NULL DEFAULT 2,
                    status TEXT NOT NULL DEFAULT 'idle',
                    last_run_time TEXT,
                    next_run_time TEXT
                );

                CREATE TABLE IF NOT EXISTS heartbeats (
                    channel TEXT PRIMARY KEY,
                    last_beat TEXT NOT NULL,
                    status TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS work_definitions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    keywords TEXT NOT NULL,
                    targets TEXT NOT NULL,
                    source_urls TEXT NOT NULL DEFAULT '[]',
                    category TEXT NOT NULL,
                    owner TEXT
                );

                CREATE TABLE IF NOT EXISTS work_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    keyword TEXT NOT NULL,
                    target TEXT NOT NULL,
                    definitions TEXT NOT NULL,
                    category TEXT NOT NULL,
                    UNIQUE (keyword, target)
                );

                CREATE TABLE IF NOT EXISTS pending_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    category TEXT NOT NULL,
                    definitions TEXT NOT NULL,
                    keyword TEXT NOT NULL,
                    target TEXT NOT NULL,
                    title TEXT NOT NULL,
                    detail_url TEXT NOT NULL UNIQUE,
                    published_at TEXT,
                    publisher TEXT,
                    crawled_at TEXT NOT NULL,
                    delivered INTEGER NOT NULL DEFAULT 0
                );

                CREATE INDEX IF NOT EXISTS idx_pending_undelivered
                    ON pending_items(delivered, crawled_at);

                CREATE TABLE IF NOT EXISTS recipients (
                    identity TEXT PRIMARY KEY,
                    address TEXT NOT NULL,
                    categories TEXT NOT NULL,
                    enabled INTEGER NOT NULL DEFAULT 1
                );

                CREATE TABLE IF NOT EXISTS quota_counters (
                    account TEXT PRIMARY KEY,
                    day TEXT NOT NULL,
                    sent INTEGER NOT NULL DEFAULT 0
                );
            "#,
        )
        .context("Failed to create schema")?;
        Ok(())
    }
}

fn parse_optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_timestamp).transpose()
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

// ============================================================================
// Crawler state
// ============================================================================

impl CrawlerStateRepository for SqliteStore {
    fn load_state(&self) -> Result<Option<CrawlerState>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT switch, frequency_hours, status, last_run_time, next_run_time
                 FROM crawler_state WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, bool>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()
            .context("Failed to read crawler state")?;

        let Some((switch, frequency_hours, status, last_run, next_run)) = row else {
            return Ok(None);
        };

        Ok(Some(CrawlerState {
            switch,
            frequency_hours,
            status: status.parse::<RunStatus>().map_err(|e| anyhow!(e))?,
            last_run_time: parse_optional_timestamp(last_run)?,
            next_run_time: parse_optional_timestamp(next_run)?,
        }))
    }

    fn save_state(&self, state: &CrawlerState) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO crawler_state (id, switch, frequency_hours, status, last_run_time, next_run_time)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                switch = excluded.switch,
                frequency_hours = excluded.frequency_hours,
                status = excluded.status,
                last_run_time = excluded.last_run_time,
                next_run_time = excluded.next_run_time",
            params![
                state.switch,
                state.frequency_hours,
                state.status.as_str(),
                state.last_run_time.map(format_timestamp),
                state.next_run_time.map(format_timestamp),
            ],
        )
        .context("Failed to save crawler state")?;
        Ok(())
    }

    fn mark_running(&self, started_at: DateTime<Utc>, next_run_time: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE crawler_state SET status = 'running', last_run_time = ?1, next_run_time = ?2
             WHERE id = 1",
            params![format_timestamp(started_at), format_timestamp(next_run_time)],
        )?;
        if updated == 0 {
            anyhow::bail!("crawler state record is missing");
        }
        Ok(())
    }

    fn mark_idle(&self) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE crawler_state SET status = 'idle' WHERE id = 1",
            [],
        )?;
        if updated == 0 {
            anyhow::bail!("crawler state record is missing");
        }
        Ok(())
    }

    fn set_switch(&self, enabled: bool) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE crawler_state SET switch = ?1 WHERE id = 1",
            params![enabled],
        )?;
        if updated == 0 {
            anyhow::bail!("crawler state record is missing");
        }
        Ok(())
    }

    fn set_frequency(&self, hours: i64) -> Result<()> {
        if hours < 1 {
            anyhow::bail!("frequency must be at least one hour, got {hours}");
        }
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE crawler_state SET frequency_hours = ?1 WHERE id = 1",
            params![hours],
        )?;
        if updated == 0 {
            anyhow::bail!("crawler state record is missing");
        }
        Ok(())
    }
}

// ============================================================================
// Heartbeats
// ============================================================================

fn channel_from_str(raw: &str) -> Option<HeartbeatChannel> {
    HeartbeatChannel::ALL
        .into_iter()
        .find(|channel| channel.as_str() == raw)
}

impl HeartbeatRepository for SqliteStore {
    fn beat(&self, channel: HeartbeatChannel, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO heartbeats (channel, last_beat, status) VALUES (?1, ?2, 'up')
             ON CONFLICT(channel) DO UPDATE SET last_beat = excluded.last_beat, status = 'up'",
            params![channel.as_str(), format_timestamp(at)],
        )
        .with_context(|| format!("Failed to record heartbeat for {channel}"))?;
        Ok(())
    }

    fn heartbeat(&self, channel: HeartbeatChannel) -> Result<Option<HeartbeatRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT last_beat, status FROM heartbeats WHERE channel = ?1",
                params![channel.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .with_context(|| format!("Failed to read heartbeat for {channel}"))?;

        row.map(|(last_beat, status)| -> Result<HeartbeatRecord> {
            Ok(HeartbeatRecord {
                channel,
                last_beat: parse_timestamp(&last_beat)?,
                status: status.parse::<ChannelStatus>().map_err(|e| anyhow!(e))?,
            })
        })
        .transpose()
    }

    fn set_channel_status(&self, channel: HeartbeatChannel, status: ChannelStatus) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE heartbeats SET status = ?1 WHERE channel = ?2",
            params![status.as_str(), channel.as_str()],
        )?;
        if updated == 0 {
            anyhow::bail!("no heartbeat record for {channel}");
        }
        Ok(())
    }

    fn heartbeats(&self) -> Result<Vec<HeartbeatRecord>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT channel, last_beat, status FROM heartbeats ORDER BY channel")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (channel, last_beat, status) in rows {
            let Some(channel) = channel_from_str(&channel) else {
                tracing::warn!(channel = %channel, "Ignoring heartbeat for unknown channel");
                continue;
            };
            records.push(HeartbeatRecord {
                channel,
                last_beat: parse_timestamp(&last_beat)?,
                status: status.parse::<ChannelStatus>().map_err(|e| anyhow!(e))?,
            });
        }
        Ok(records)
    }
}

// ============================================================================
// Definitions and work pool
// ============================================================================

impl DefinitionRepository for SqliteStore {
    fn definitions(&self) -> Result<Vec<WorkDefinition>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, keywords, targets, source_urls, category, owner
             FROM work_definitions ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut definitions = Vec::with_capacity(rows.len());
        for (name, keywords, targets, source_urls, category, owner) in rows {
            let parsed = (
                serde_json::from_str::<Vec<String>>(&keywords),
                serde_json::from_str::<Vec<String>>(&targets),
            );
            let (Ok(keywords), Ok(targets)) = parsed else {
                tracing::warn!(
                    definition = %name,
                    "Skipping definition whose keywords or targets are not a list"
                );
                continue;
            };
            definitions.push(WorkDefinition {
                name,
                keywords,
                targets,
                source_urls: serde_json::from_str(&source_urls).unwrap_or_default(),
                category,
                owner,
            });
        }
        Ok(definitions)
    }

    fn upsert_definition(&self, definition: &WorkDefinition) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO work_definitions (name, keywords, targets, source_urls, category, owner)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
                keywords = excluded.keywords,
                targets = excluded.targets,
                source_urls = excluded.source_urls,
                category = excluded.category,
                owner = excluded.owner",
            params![
                definition.name,
                serde_json::to_string(&definition.keywords)?,
                serde_json::to_string(&definition.targets)?,
                serde_json::to_string(&definition.source_urls)?,
                definition.category,
                definition.owner,
            ],
        )
        .with_context(|| format!("Failed to save definition '{}'", definition.name))?;
        Ok(())
    }

    fn remove_definition(&self, name: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM work_definitions WHERE name = ?1", params![name])?;
        Ok(removed > 0)
    }
}

impl WorkPoolRepository for SqliteStore {
    fn replace_pool(&self, items: &[WorkItem]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM work_items", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO work_items (keyword, target, definitions, category)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for item in items {
                stmt.execute(params![
                    item.key.keyword,
                    item.key.target,
                    serde_json::to_string(&item.definitions)?,
                    item.category,
                ])
                .with_context(|| format!("Failed to insert work item {}", item.key))?;
            }
        }

        tx.commit().context("Failed to commit work pool")?;
        Ok(items.len())
    }

    fn work_items(&self) -> Result<Vec<WorkItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT keyword, target, definitions, category FROM work_items ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(keyword, target, definitions, category)| -> Result<WorkItem> {
                Ok(WorkItem {
                    key: WorkKey::new(keyword, target),
                    definitions: serde_json::from_str(&definitions)?,
                    category,
                })
            })
            .collect()
    }
}

// ============================================================================
// Results
// ============================================================================

type PendingRow = (
    i64,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    bool,
);

impl ResultRepository for SqliteStore {
    fn append(&self, items: &[NewPendingItem]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO pending_items
                    (category, definitions, keyword, target, title, detail_url,
                     published_at, publisher, crawled_at, delivered)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)",
            )?;
            for item in items {
                inserted += stmt.execute(params![
                    item.category,
                    serde_json::to_string(&item.definitions)?,
                    item.keyword,
                    item.target,
                    item.title,
                    item.detail_url,
                    item.published_at.map(format_timestamp),
                    item.publisher,
                    format_timestamp(item.crawled_at),
                ])?;
            }
        }
        tx.commit().context("Failed to commit results")?;
        Ok(inserted)
    }

    fn undelivered(&self) -> Result<Vec<PendingItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, category, definitions, keyword, target, title, detail_url,
                    published_at, publisher, crawled_at, delivered
             FROM pending_items WHERE delivered = 0 ORDER BY julianday(crawled_at), id",
        )?;
        let rows: Vec<PendingRow> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                    row.get(10)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(
                |(
                    id,
                    category,
                    definitions,
                    keyword,
                    target,
                    title,
                    detail_url,
                    published_at,
                    publisher,
                    crawled_at,
                    delivered,
                )|
                 -> Result<PendingItem> {
                    Ok(PendingItem {
                        id,
                        category,
                        definitions: serde_json::from_str(&definitions).unwrap_or_default(),
                        keyword,
                        target,
                        title,
                        detail_url,
                        published_at: parse_optional_timestamp(published_at)?,
                        publisher,
                        crawled_at: parse_timestamp(&crawled_at)?,
                        delivered,
                    })
                },
            )
            .collect()
    }

    fn mark_delivered(&self, ids: &[i64]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE pending_items SET delivered = 1 WHERE id = ?1 AND delivered = 0")?;
            for id in ids {
                updated += stmt.execute(params![id])?;
            }
        }
        tx.commit().context("Failed to mark results delivered")?;
        Ok(updated)
    }

    fn sweep_stale(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                // rows written by other tools may carry naive timestamps,
                // so compare instants rather than text
                "UPDATE pending_items SET delivered = 1
                 WHERE delivered = 0 AND julianday(crawled_at) < julianday(?1)",
                params![format_timestamp(cutoff)],
            )
            .context("Failed to sweep stale results")?;
        Ok(updated)
    }
}

// ============================================================================
// Recipients and quotas
// ============================================================================

impl SubscriberRepository for SqliteStore {
    fn subscribers(&self) -> Result<Vec<Recipient>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT identity, address, categories, enabled FROM recipients
             WHERE enabled = 1 ORDER BY identity",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut recipients = Vec::with_capacity(rows.len());
        for (identity, address, categories, enabled) in rows {
            let Ok(categories) = serde_json::from_str::<BTreeSet<String>>(&categories) else {
                tracing::warn!(recipient = %identity, "Skipping recipient with malformed categories");
                continue;
            };
            recipients.push(Recipient {
                identity,
                address,
                categories,
                enabled,
            });
        }
        Ok(recipients)
    }

    fn upsert_recipient(&self, recipient: &Recipient) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO recipients (identity, address, categories, enabled)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(identity) DO UPDATE SET
                address = excluded.address,
                categories = excluded.categories,
                enabled = excluded.enabled",
            params![
                recipient.identity,
                recipient.address,
                serde_json::to_string(&recipient.categories)?,
                recipient.enabled,
            ],
        )
        .with_context(|| format!("Failed to save recipient '{}'", recipient.identity))?;
        Ok(())
    }
}

impl QuotaRepository for SqliteStore {
    fn sent_on(&self, account: &str, day: NaiveDate) -> Result<u32> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT day, sent FROM quota_counters WHERE account = ?1",
                params![account],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)),
            )
            .optional()?;

        Ok(match row {
            Some((stored_day, sent)) if stored_day == day_key(day) => sent,
            _ => 0,
        })
    }

    fn record_send(&self, account: &str, day: NaiveDate) -> Result<u32> {
        let conn = self.conn()?;
        let day = day_key(day);
        conn.execute(
            "INSERT INTO quota_counters (account, day, sent) VALUES (?1, ?2, 1)
             ON CONFLICT(account) DO UPDATE SET
                sent = CASE WHEN day = excluded.day THEN sent + 1 ELSE 1 END,
                day = excluded.day",
            params![account, day],
        )
        .with_context(|| format!("Failed to record send for '{account}'"))?;

        let sent = conn.query_row(
            "SELECT sent FROM quota_counters WHERE account = ?1",
            params![account],
            |row| row.get::<_, u32>(0),
        )?;
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkKey;
    use chrono::{Duration, TimeZone};

    fn item(keyword: &str, target: &str) -> WorkItem {
        WorkItem {
            key: WorkKey::new(keyword, target),
            definitions: BTreeSet::from(["def".to_string()]),
            category: "news".into(),
        }
    }

    #[test]
    fn test_replace_pool_rolls_back_on_failure() {
        let store = SqliteStore::in_memory().unwrap();
        store.replace_pool(&[item("steel", "siteA")]).unwrap();

        store
            .conn()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_boom BEFORE INSERT ON work_items
                 WHEN NEW.keyword = 'boom'
                 BEGIN SELECT RAISE(ABORT, 'boom rejected'); END;",
            )
            .unwrap();

        let result = store.replace_pool(&[item("copper", "siteB"), item("boom", "siteC")]);
        assert!(result.is_err());

        let pool = store.work_items().unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].key, WorkKey::new("steel", "siteA"));
    }

    #[test]
    fn test_naive_heartbeat_timestamp_is_read_as_utc() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO heartbeats (channel, last_beat, status)
                 VALUES ('crawl', '2025-05-20 14:30:00', '1')",
                [],
            )
            .unwrap();

        let record = store.heartbeat(HeartbeatChannel::Crawl).unwrap().unwrap();
        assert_eq!(
            record.last_beat,
            Utc.with_ymd_and_hms(2025, 5, 20, 14, 30, 0).unwrap()
        );
        assert_eq!(record.status, ChannelStatus::Up);
    }

    #[test]
    fn test_malformed_definition_is_skipped() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO work_definitions (name, keywords, targets, category)
                 VALUES ('broken', 'steel', '[\"siteA\"]', 'news')",
                [],
            )
            .unwrap();
        store
            .upsert_definition(&WorkDefinition {
                name: "ok".into(),
                keywords: vec!["steel".into()],
                targets: vec!["siteA".into()],
                source_urls: vec![],
                category: "news".into(),
                owner: None,
            })
            .unwrap();

        let definitions = store.definitions().unwrap();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].name, "ok");
    }

    #[test]
    fn test_sweep_uses_strict_cutoff() {
        let store = SqliteStore::in_memory().unwrap();
        let cutoff = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let make = |url: &str, crawled_at| NewPendingItem {
            category: "news".into(),
            definitions: vec!["def".into()],
            keyword: "steel".into(),
            target: "siteA".into(),
            title: "Steel prices".into(),
            detail_url: url.into(),
            published_at: None,
            publisher: None,
            crawled_at,
        };
        store
            .append(&[
                make("https://a/1", cutoff - Duration::seconds(1)),
                make("https://a/2", cutoff),
            ])
            .unwrap();

        assert_eq!(store.sweep_stale(cutoff).unwrap(), 1);
        let remaining = store.undelivered().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].detail_url, "https://a/2");
    }

    #[test]
    fn test_sweep_and_order_with_naive_timestamps() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .conn()
            .unwrap()
            .execute_batch(
                "INSERT INTO pending_items
                    (category, definitions, keyword, target, title, detail_url, crawled_at)
                 VALUES
                    ('news', '[\"def\"]', 'steel', 'siteA', 'later', 'https://a/later',
                     '2025-06-02 11:00:00'),
                    ('news', '[\"def\"]', 'steel', 'siteA', 'earlier', 'https://a/earlier',
                     '2025-06-02T10:30:00.000000Z'),
                    ('news', '[\"def\"]', 'steel', 'siteA', 'old', 'https://a/old',
                     '2025-06-02 09:59:59');",
            )
            .unwrap();

        let order: Vec<String> = store
            .undelivered()
            .unwrap()
            .into_iter()
            .map(|item| item.title)
            .collect();
        assert_eq!(order, vec!["old", "earlier", "later"]);

        let cutoff = Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap();
        assert_eq!(store.sweep_stale(cutoff).unwrap(), 1);

        let remaining: Vec<String> = store
            .undelivered()
            .unwrap()
            .into_iter()
            .map(|item| item.detail_url)
            .collect();
        assert_eq!(remaining, vec!["https://a/earlier", "https://a/later"]);
    }

    #[test]
    fn test_quota_counter_rolls_over_by_day() {
        let store = SqliteStore::in_memory().unwrap();
        let monday = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let tuesday = monday.succ_opt().unwrap();

        assert_eq!(store.record_send("a@example.com", monday).unwrap(), 1);
        assert_eq!(store.record_send("a@example.com", monday).unwrap(), 2);
        assert_eq!(store.sent_on("a@example.com", tuesday).unwrap(), 0);
        assert_eq!(store.record_send("a@example.com", tuesday).unwrap(), 1);
        assert_eq!(store.sent_on("a@example.com", tuesday).unwrap(), 1);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tidings.db");
        let store = SqliteStore::open(&path).unwrap();
        store.save_state(&CrawlerState::new(3)).unwrap();
        drop(store);

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.load_state().unwrap().unwrap().frequency_hours, 3);
    }
}
