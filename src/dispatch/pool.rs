//! Round-robin pool of quota-limited outbound accounts
//!
//! The pool keeps the rotation cursor in memory; send counts live in the
//! [`QuotaRepository`] so a restarted dispatcher picks up where it left off.
//! A count belongs to one calendar day and reads as zero on any later day,
//! which is what resets the quota.

use std::collections::HashSet;

use chrono::{Local, NaiveDate};
use tracing::{debug, info};

use super::error::PoolError;
use crate::config::DispatchConfig;
use crate::storage::SharedQuotaRepository;

/// One sending identity and its daily limit
#[derive(Clone, PartialEq, Eq)]
pub struct OutboundAccount {
    pub identity: String,
    pub credential: String,
    pub host: String,
    pub port: u16,
    pub starttls: bool,
    pub daily_limit: u32,
}

impl std::fmt::Debug for OutboundAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundAccount")
            .field("identity", &self.identity)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("starttls", &self.starttls)
            .field("daily_limit", &self.daily_limit)
            .finish_non_exhaustive()
    }
}

/// The calendar day quotas are counted against
pub fn quota_day() -> NaiveDate {
    Local::now().date_naive()
}

pub struct ResourcePool {
    accounts: Vec<OutboundAccount>,
    cursor: usize,
    quotas: SharedQuotaRepository,
    current_day: Option<NaiveDate>,
}

impl ResourcePool {
    pub fn new(accounts: Vec<OutboundAccount>, quotas: SharedQuotaRepository) -> Self {
        Self {
            accounts,
            cursor: 0,
            quotas,
            current_day: None,
        }
    }

    /// Build the pool from configured accounts, in configuration order
    pub fn from_config(config: &DispatchConfig, quotas: SharedQuotaRepository) -> Self {
        let accounts = config
            .accounts
            .iter()
            .map(|account| OutboundAccount {
                identity: account.identity.clone(),
                credential: account.credential.clone(),
                host: account.host.clone(),
                port: account.port,
                starttls: account.starttls,
                daily_limit: account.daily_limit.unwrap_or(config.daily_limit),
            })
            .collect();
        Self::new(accounts, quotas)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn accounts(&self) -> &[OutboundAccount] {
        &self.accounts
    }

    fn roll_day(&mut self, today: NaiveDate) {
        if self.current_day == Some(today) {
            return;
        }
        if let Some(previous) = self.current_day {
            info!(%previous, %today, "Quota day rolled over, counters start from zero");
        }
        self.current_day = Some(today);
    }

    fn sent(&self, identity: &str, today: NaiveDate) -> Result<u32, PoolError> {
        self.quotas
            .sent_on(identity, today)
            .map_err(|e| PoolError::Quota {
                account: identity.to_string(),
                reason: format!("{e:#}"),
            })
    }

    fn account(&self, identity: &str) -> Result<&OutboundAccount, PoolError> {
        self.accounts
            .iter()
            .find(|a| a.identity == identity)
            .ok_or_else(|| PoolError::UnknownAccount(identity.to_string()))
    }

    /// Next account with quota left today, skipping `exclude`.
    ///
    /// Scans at most one full rotation starting at the cursor.
    pub fn acquire_on(
        &mut self,
        today: NaiveDate,
        exclude: &HashSet<String>,
    ) -> Result<OutboundAccount, PoolError> {
        if self.accounts.is_empty() {
            return Err(PoolError::Empty);
        }
        self.roll_day(today);

        let len = self.accounts.len();
        for offset in 0..len {
            let index = (self.cursor + offset) % len;
            let account = &self.accounts[index];
            if exclude.contains(&account.identity) {
                continue;
            }

            let sent = self.sent(&account.identity, today)?;
            if sent < account.daily_limit {
                debug!(
                    account = %account.identity,
                    sent,
                    limit = account.daily_limit,
                    "Account acquired"
                );
                let account = account.clone();
                self.cursor = (index + 1) % len;
                return Ok(account);
            }
        }

        Err(PoolError::Exhausted { accounts: len })
    }

    pub fn acquire(&mut self) -> Result<OutboundAccount, PoolError> {
        self.acquire_on(quota_day(), &HashSet::new())
    }

    /// Count one send against `identity`, returns the new count
    pub fn release_on(&mut self, identity: &str, today: NaiveDate) -> Result<u32, PoolError> {
        self.account(identity)?;
        self.roll_day(today);
        self.quotas
            .record_send(identity, today)
            .map_err(|e| PoolError::Quota {
                account: identity.to_string(),
                reason: format!("{e:#}"),
            })
    }

    pub fn release(&mut self, identity: &str) -> Result<u32, PoolError> {
        self.release_on(identity, quota_day())
    }

    /// Sends left today for `identity`
    pub fn remaining_on(&self, identity: &str, today: NaiveDate) -> Result<u32, PoolError> {
        let account = self.account(identity)?;
        let sent = self.sent(identity, today)?;
        Ok(account.daily_limit.saturating_sub(sent))
    }

    pub fn remaining(&self, identity: &str) -> Result<u32, PoolError> {
        self.remaining_on(identity, quota_day())
    }
}
