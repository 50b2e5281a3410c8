//! Periodic delivery of pending crawl results
//!
//! One cycle pulls every undelivered item, groups it by recipient through
//! category subscriptions, and sends one message per recipient using the
//! account pool. After delivery the cycle marks every result older than the
//! retention window as delivered, whether anyone received it or not.
//!
//! ```text
//!   undelivered items ──► match categories ──► per recipient
//!                                                   │
//!        ResourcePool.acquire ──► connect ──► send ─┴─► mark delivered
//!                 ▲                          │
//!                 └──── session failure ─────┘
//! ```

pub mod content;
pub mod error;
pub mod pool;
pub mod transport;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::error::{Result, TidingsErrorTrait};
use crate::models::{PendingItem, Recipient};
use crate::storage::{SharedResultRepository, SharedSubscriberRepository};
use crate::utils::sleep_or_shutdown;

pub use content::NotificationRenderer;
pub use error::{PoolError, TransportError};
pub use pool::{OutboundAccount, ResourcePool};
pub use transport::{MailSession, MailTransport, OutgoingMessage, SmtpTransport};

/// Items gathered for one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: Recipient,
    pub items: Vec<PendingItem>,
}

/// Group items by subscribing recipient.
///
/// Recipients without a matching item are dropped. Returns the notifications
/// and the number of items nobody subscribes to.
pub fn match_recipients(
    recipients: &[Recipient],
    items: &[PendingItem],
) -> (Vec<Notification>, usize) {
    let notifications: Vec<Notification> = recipients
        .iter()
        .filter(|r| r.enabled)
        .filter_map(|recipient| {
            let matched: Vec<PendingItem> = items
                .iter()
                .filter(|item| recipient.subscribes_to(&item.category))
                .cloned()
                .collect();
            (!matched.is_empty()).then(|| Notification {
                recipient: recipient.clone(),
                items: matched,
            })
        })
        .collect();

    let unmatched = items
        .iter()
        .filter(|item| {
            !recipients
                .iter()
                .any(|r| r.enabled && r.subscribes_to(&item.category))
        })
        .count();

    (notifications, unmatched)
}

/// Counts from one dispatch cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Recipients with at least one matching item
    pub recipients: usize,
    pub sent: usize,
    pub failed: usize,
    /// Recipients left for the next cycle because no account had quota
    pub deferred: usize,
    /// Undelivered items no recipient subscribes to
    pub unmatched: usize,
    pub pool_exhausted: bool,
    pub swept: usize,
}

pub struct DispatchCycle {
    results: SharedResultRepository,
    subscribers: SharedSubscriberRepository,
    pool: ResourcePool,
    transport: Arc<dyn MailTransport>,
    renderer: NotificationRenderer,
    retention: chrono::Duration,
    interval: Duration,
    /// Delivered items whose delivery mark has not been stored yet
    unmarked: HashSet<i64>,
}

impl DispatchCycle {
    pub fn new(
        results: SharedResultRepository,
        subscribers: SharedSubscriberRepository,
        pool: ResourcePool,
        transport: Arc<dyn MailTransport>,
        config: &DispatchConfig,
    ) -> Result<Self> {
        Ok(Self {
            results,
            subscribers,
            pool,
            transport,
            renderer: NotificationRenderer::new()?,
            retention: chrono::Duration::hours(config.retention_hours),
            interval: Duration::from_secs(config.cycle_interval_secs),
            unmarked: HashSet::new(),
        })
    }

    /// One pull, deliver and sweep pass.
    ///
    /// The sweep runs even when delivery fails part way; the delivery error
    /// is returned after it.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<DispatchReport> {
        let today = now.with_timezone(&Local).date_naive();
        let mut report = DispatchReport::default();

        let delivery = self.deliver(today, &mut report).await;

        let cutoff = now - self.retention;
        let swept = self.results.sweep_stale(cutoff);
        match &swept {
            Ok(count) => {
                report.swept = *count;
                if *count > 0 {
                    info!(swept = count, cutoff = %cutoff, "Stale results marked delivered");
                }
            }
            Err(e) => error!(error = %e, "Stale result sweep failed"),
        }

        delivery?;
        swept?;

        info!(
            recipients = report.recipients,
            sent = report.sent,
            failed = report.failed,
            deferred = report.deferred,
            unmatched = report.unmatched,
            swept = report.swept,
            "Dispatch cycle finished"
        );
        Ok(report)
    }

    async fn deliver(&mut self, today: NaiveDate, report: &mut DispatchReport) -> Result<()> {
        self.retry_unmarked();

        let mut items = self.results.undelivered()?;
        items.retain(|item| !self.unmarked.contains(&item.id));
        let recipients = self.subscribers.subscribers()?;
        let (notifications, unmatched) = match_recipients(&recipients, &items);
        report.recipients = notifications.len();
        report.unmatched = unmatched;

        if notifications.is_empty() {
            debug!(pending = items.len(), "Nothing to deliver");
            return Ok(());
        }

        // accounts that refused a connection or whose counters cannot be trusted
        let mut unusable: HashSet<String> = HashSet::new();
        let mut next = 0;

        'accounts: while next < notifications.len() {
            let account = match self.pool.acquire_on(today, &unusable) {
                Ok(account) => account,
                Err(e) => {
                    report.pool_exhausted = matches!(e, PoolError::Exhausted { .. });
                    report.deferred = notifications.len() - next;
                    if matches!(e, PoolError::Quota { .. }) {
                        error!(
                            deferred = report.deferred,
                            error = %e,
                            "Account selection failed, deferring remaining recipients"
                        );
                    } else {
                        warn!(
                            unusable = unusable.len(),
                            deferred = report.deferred,
                            error = %e,
                            "No account available, deferring remaining recipients"
                        );
                    }
                    break;
                }
            };

            let mut session = match self.transport.connect(&account).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(account = %account.identity, error = %e, "Skipping account for this cycle");
                    unusable.insert(account.identity.clone());
                    continue;
                }
            };

            while next < notifications.len() {
                match self.pool.remaining_on(&account.identity, today) {
                    Ok(0) => {
                        debug!(account = %account.identity, "Account quota used up, rotating");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(account = %account.identity, error = %e, "Quota read failed, skipping account");
                        unusable.insert(account.identity.clone());
                        break;
                    }
                }

                let notification = &notifications[next];
                next += 1;

                let message = match self
                    .renderer
                    .render(&notification.recipient, &notification.items)
                {
                    Ok(message) => message,
                    Err(e) => {
                        report.failed += 1;
                        warn!(recipient = %notification.recipient.identity, error = %e, "Could not render notification");
                        continue;
                    }
                };

                match session.send(&message).await {
                    Ok(()) => {
                        report.sent += 1;
                        let ids: Vec<i64> = notification.items.iter().map(|i| i.id).collect();
                        self.mark_sent(&notification.recipient.identity, &ids);
                        info!(
                            recipient = %notification.recipient.identity,
                            account = %account.identity,
                            items = ids.len(),
                            "Notification sent"
                        );

                        if !self.count_send(&account.identity, today) {
                            unusable.insert(account.identity.clone());
                            break;
                        }
                    }
                    Err(e) if e.is_session_failure() => {
                        report.failed += 1;
                        warn!(
                            recipient = %notification.recipient.identity,
                            account = %account.identity,
                            error = %e,
                            "Send failed, switching account"
                        );
                        // the attempt still counts against the account
                        if !self.count_send(&account.identity, today) {
                            unusable.insert(account.identity.clone());
                        }
                        session.close().await;
                        continue 'accounts;
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            recipient = %notification.recipient.identity,
                            error = %e,
                            "Recipient skipped"
                        );
                    }
                }
            }

            session.close().await;
        }

        Ok(())
    }

    /// Mark a recipient's items delivered, remembering them on failure so
    /// they are neither sent again nor forgotten.
    fn mark_sent(&mut self, recipient: &str, ids: &[i64]) {
        if let Err(e) = self.results.mark_delivered(ids) {
            error!(
                recipient,
                items = ids.len(),
                error = %e,
                "Sent but failed to mark items delivered, will retry"
            );
            self.unmarked.extend(ids.iter().copied());
        }
    }

    fn retry_unmarked(&mut self) {
        if self.unmarked.is_empty() {
            return;
        }
        let ids: Vec<i64> = self.unmarked.iter().copied().collect();
        match self.results.mark_delivered(&ids) {
            Ok(_) => {
                info!(items = ids.len(), "Pending delivery marks written");
                self.unmarked.clear();
            }
            Err(e) => warn!(items = ids.len(), error = %e, "Pending delivery marks still failing"),
        }
    }

    /// Count one send against the account. Returns false when the counter
    /// could not be written and the account should not be used again this
    /// cycle.
    fn count_send(&mut self, identity: &str, today: NaiveDate) -> bool {
        match self.pool.release_on(identity, today) {
            Ok(_) => true,
            Err(e) => {
                error!(account = identity, error = %e, "Quota write failed, skipping account");
                false
            }
        }
    }

    /// Run a cycle, then wait the interval, until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            accounts = self.pool.len(),
            "Dispatcher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_cycle(Utc::now()).await {
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {
                    warn!(category = e.category().as_str(), error = %e, "Dispatch cycle failed, retrying next interval");
                }
                Err(e) => {
                    error!(category = e.category().as_str(), error = %e, "Dispatch cycle failed");
                }
            }

            if sleep_or_shutdown(self.interval, &mut shutdown).await {
                break;
            }
        }

        info!("Dispatcher stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
