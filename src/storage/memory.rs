//! In-memory store
//!
//! Mirrors [`super::SqliteStore`] semantics for tests and dry runs. Failure
//! switches let tests exercise the error paths of the loops.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};

use super::repository::{
    CrawlerStateRepository, DefinitionRepository, HeartbeatRepository, QuotaRepository,
    ResultRepository, SubscriberRepository, WorkPoolRepository,
};
use crate::models::{
    ChannelStatus, CrawlerState, HeartbeatChannel, HeartbeatRecord, NewPendingItem,
    PendingItem, Recipient, RunStatus, WorkDefinition, WorkItem,
};

/// In-memory implementation of every repository trait
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<Option<CrawlerState>>,
    heartbeats: RwLock<BTreeMap<&'static str, HeartbeatRecord>>,
    definitions: RwLock<Vec<WorkDefinition>>,
    pool: RwLock<Vec<WorkItem>>,
    results: RwLock<Vec<PendingItem>>,
    recipients: RwLock<BTreeMap<String, Recipient>>,
    quotas: RwLock<HashMap<String, (NaiveDate, u32)>>,
    state_unavailable: AtomicBool,
    fail_pool_replace: AtomicBool,
    quota_writes_fail: AtomicBool,
    quota_reads_fail: AtomicBool,
    fail_mark_delivered: AtomicBool,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("memory store lock poisoned"))
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every crawler state access fail until switched back
    pub fn set_state_unavailable(&self, unavailable: bool) {
        self.state_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next pool replacement fail without touching the pool
    pub fn fail_next_pool_replace(&self) {
        self.fail_pool_replace.store(true, Ordering::SeqCst);
    }

    /// Make every quota counter write fail until switched back
    pub fn set_quota_writes_failing(&self, failing: bool) {
        self.quota_writes_fail.store(failing, Ordering::SeqCst);
    }

    /// Make every quota counter read fail until switched back
    pub fn set_quota_reads_failing(&self, failing: bool) {
        self.quota_reads_fail.store(failing, Ordering::SeqCst);
    }

    /// Make the next `mark_delivered` fail without touching any result
    pub fn fail_next_mark_delivered(&self) {
        self.fail_mark_delivered.store(true, Ordering::SeqCst);
    }

    /// Every stored result, delivered or not
    pub fn all_results(&self) -> Result<Vec<PendingItem>> {
        Ok(read(&self.results)?.clone())
    }

    fn check_state_available(&self) -> Result<()> {
        if self.state_unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("crawler state store unavailable");
        }
        Ok(())
    }

    fn update_state(&self, apply: impl FnOnce(&mut CrawlerState)) -> Result<()> {
        self.check_state_available()?;
        let mut state = write(&self.state)?;
        match state.as_mut() {
            Some(state) => {
                apply(state);
                Ok(())
            }
            None => anyhow::bail!("crawler state record is missing"),
        }
    }
}

impl CrawlerStateRepository for MemoryStore {
    fn load_state(&self) -> Result<Option<CrawlerState>> {
        self.check_state_available()?;
        Ok(read(&self.state)?.clone())
    }

    fn save_state(&self, state: &CrawlerState) -> Result<()> {
        self.check_state_available()?;
        *write(&self.state)? = Some(state.clone());
        Ok(())
    }

    fn mark_running(&self, started_at: DateTime<Utc>, next_run_time: DateTime<Utc>) -> Result<()> {
        self.update_state(|state| {
            state.status = RunStatus::Running;
            state.last_run_time = Some(started_at);
            state.next_run_time = Some(next_run_time);
        })
    }

    fn mark_idle(&self) -> Result<()> {
        self.update_state(|state| state.status = RunStatus::Idle)
    }

    fn set_switch(&self, enabled: bool) -> Result<()> {
        self.update_state(|state| state.switch = enabled)
    }

    fn set_frequency(&self, hours: i64) -> Result<()> {
        if hours < 1 {
            anyhow::bail!("frequency must be at least one hour, got {hours}");
        }
        self.update_state(|state| state.frequency_hours = hours)
    }
}

impl HeartbeatRepository for MemoryStore {
    fn beat(&self, channel: HeartbeatChannel, at: DateTime<Utc>) -> Result<()> {
        write(&self.heartbeats)?.insert(
            channel.as_str(),
            HeartbeatRecord {
                channel,
                last_beat: at,
                status: ChannelStatus::Up,
            },
        );
        Ok(())
    }

    fn heartbeat(&self, channel: HeartbeatChannel) -> Result<Option<HeartbeatRecord>> {
        Ok(read(&self.heartbeats)?.get(channel.as_str()).cloned())
    }

    fn set_channel_status(&self, channel: HeartbeatChannel, status: ChannelStatus) -> Result<()> {
        let mut heartbeats = write(&self.heartbeats)?;
        match heartbeats.get_mut(channel.as_str()) {
            Some(record) => {
                record.status = status;
                Ok(())
            }
            None => anyhow::bail!("no heartbeat record for {channel}"),
        }
    }

    fn heartbeats(&self) -> Result<Vec<HeartbeatRecord>> {
        Ok(read(&self.heartbeats)?.values().cloned().collect())
    }
}

impl DefinitionRepository for MemoryStore {
    fn definitions(&self) -> Result<Vec<WorkDefinition>> {
        Ok(read(&self.definitions)?.clone())
    }

    fn upsert_definition(&self, definition: &WorkDefinition) -> Result<()> {
        let mut definitions = write(&self.definitions)?;
        match definitions.iter_mut().find(|d| d.name == definition.name) {
            Some(existing) => *existing = definition.clone(),
            None => definitions.push(definition.clone()),
        }
        Ok(())
    }

    fn remove_definition(&self, name: &str) -> Result<bool> {
        let mut definitions = write(&self.definitions)?;
        let before = definitions.len();
        definitions.retain(|d| d.name != name);
        Ok(definitions.len() < before)
    }
}

impl WorkPoolRepository for MemoryStore {
    fn replace_pool(&self, items: &[WorkItem]) -> Result<usize> {
        if self.fail_pool_replace.swap(false, Ordering::SeqCst) {
            anyhow::bail!("work pool write rejected");
        }
        *write(&self.pool)? = items.to_vec();
        Ok(items.len())
    }

    fn work_items(&self) -> Result<Vec<WorkItem>> {
        Ok(read(&self.pool)?.clone())
    }
}

impl ResultRepository for MemoryStore {
    fn append(&self, items: &[NewPendingItem]) -> Result<usize> {
        let mut results = write(&self.results)?;
        let mut inserted = 0;
        for item in items {
            if results.iter().any(|r| r.detail_url == item.detail_url) {
                continue;
            }
            let id = results.len() as i64 + 1;
            results.push(PendingItem {
                id,
                category: item.category.clone(),
                definitions: item.definitions.clone(),
                keyword: item.keyword.clone(),
                target: item.target.clone(),
                title: item.title.clone(),
                detail_url: item.detail_url.clone(),
                published_at: item.published_at,
                publisher: item.publisher.clone(),
                crawled_at: item.crawled_at,
                delivered: false,
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    fn undelivered(&self) -> Result<Vec<PendingItem>> {
        let mut pending: Vec<PendingItem> = read(&self.results)?
            .iter()
            .filter(|r| !r.delivered)
            .cloned()
            .collect();
        pending.sort_by_key(|r| (r.crawled_at, r.id));
        Ok(pending)
    }

    fn mark_delivered(&self, ids: &[i64]) -> Result<usize> {
        if self.fail_mark_delivered.swap(false, Ordering::SeqCst) {
            anyhow::bail!("result update rejected");
        }
        let mut results = write(&self.results)?;
        let mut updated = 0;
        for result in results.iter_mut() {
            if !result.delivered && ids.contains(&result.id) {
                result.delivered = true;
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn sweep_stale(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut results = write(&self.results)?;
        let mut updated = 0;
        for result in results.iter_mut() {
            if !result.delivered && result.crawled_at < cutoff {
                result.delivered = true;
                updated += 1;
            }
        }
        Ok(updated)
    }
}

impl SubscriberRepository for MemoryStore {
    fn subscribers(&self) -> Result<Vec<Recipient>> {
        Ok(read(&self.recipients)?
            .values()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }

    fn upsert_recipient(&self, recipient: &Recipient) -> Result<()> {
        write(&self.recipients)?.insert(recipient.identity.clone(), recipient.clone());
        Ok(())
    }
}

impl QuotaRepository for MemoryStore {
    fn sent_on(&self, account: &str, day: NaiveDate) -> Result<u32> {
        if self.quota_reads_fail.load(Ordering::SeqCst) {
            anyhow::bail!("quota counters unavailable");
        }
        Ok(match read(&self.quotas)?.get(account) {
            Some((stored_day, sent)) if *stored_day == day => *sent,
            _ => 0,
        })
    }

    fn record_send(&self, account: &str, day: NaiveDate) -> Result<u32> {
        if self.quota_writes_fail.load(Ordering::SeqCst) {
            anyhow::bail!("quota counter write rejected");
        }
        let mut quotas = write(&self.quotas)?;
        let entry = quotas.entry(account.to_string()).or_insert((day, 0));
        if entry.0 != day {
            *entry = (day, 0);
        }
        entry.1 += 1;
        Ok(entry.1)
    }
}
