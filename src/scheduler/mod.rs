//! Crawl scheduler
//!
//! Polls the crawler state singleton and runs a crawl cycle whenever the
//! next run time has passed.
//!
//! ```text
//!            ┌──────────── switch off ────────────┐
//!            ▼                                    │
//!   ┌──────────────┐  due   ┌──────────────┐      │
//!   │     Idle     │───────►│   Running    │      │
//!   └──────────────┘        └──────────────┘      │
//!            ▲                 │ sync pool        │
//!            │                 │ run work units   │
//!            └──── always ─────┘                  │
//! ```
//!
//! The next run time is anchored to the start of a cycle, so a cycle that
//! overruns its frequency makes the following poll fire at once instead of
//! skipping a run.

pub mod error;
pub mod work;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{Result, TidingsErrorTrait};
use crate::fanout::{PoolSynchronizer, SyncReport};
use crate::models::RunStatus;
use crate::storage::{
    SharedCrawlerStateRepository, SharedResultRepository, SharedWorkPoolRepository,
};
use crate::utils::sleep_or_shutdown;

pub use error::{SchedulerError, SchedulerResult};
pub use work::{WorkParameters, WorkUnit, WorkUnitRegistry};

/// What one crawl cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub sync: SyncReport,
    /// Items handed to a work unit
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items whose target has no registered unit
    pub skipped: usize,
    /// New results stored
    pub stored: usize,
    /// The cycle stopped early because shutdown was requested
    pub interrupted: bool,
}

/// Outcome of a single poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The crawl switch is off
    Disabled,
    /// Not due yet; sleep at most `wait`
    NotDue { wait: Duration },
    /// A cycle ran
    Completed(CycleReport),
}

pub struct CrawlScheduler {
    state: SharedCrawlerStateRepository,
    synchronizer: PoolSynchronizer,
    pool: SharedWorkPoolRepository,
    results: SharedResultRepository,
    registry: WorkUnitRegistry,
    poll_interval: Duration,
    failure_backoff: Duration,
}

impl CrawlScheduler {
    pub fn new(
        state: SharedCrawlerStateRepository,
        synchronizer: PoolSynchronizer,
        pool: SharedWorkPoolRepository,
        results: SharedResultRepository,
        registry: WorkUnitRegistry,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            state,
            synchronizer,
            pool,
            results,
            registry,
            poll_interval: Duration::from_secs(config.poll_interval_secs.clamp(1, 60)),
            failure_backoff: Duration::from_secs(config.failure_backoff_secs),
        }
    }

    /// Run one scheduler iteration at `now`.
    ///
    /// Errors reading or writing the crawler state abort the iteration; work
    /// unit failures never do.
    pub async fn poll_once(
        &self,
        now: DateTime<Utc>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<PollOutcome> {
        let state = self
            .state
            .load_state()
            .map_err(|e| SchedulerError::state_access("load", format!("{e:#}")))?
            .ok_or(SchedulerError::StateMissing)?;

        if !state.switch {
            debug!("Crawl switch is off");
            return Ok(PollOutcome::Disabled);
        }

        if !state.is_due(now) {
            if state.status == RunStatus::Running {
                warn!("Crawler state left running outside a cycle, resetting to idle");
                self.state
                    .mark_idle()
                    .map_err(|e| SchedulerError::state_access("mark_idle", format!("{e:#}")))?;
            }

            let remaining = state
                .next_run_time
                .and_then(|next| (next - now).to_std().ok())
                .unwrap_or_default();
            return Ok(PollOutcome::NotDue {
                wait: remaining.min(self.poll_interval),
            });
        }

        let frequency_hours = if state.frequency_hours < 1 {
            warn!(
                frequency_hours = state.frequency_hours,
                "Crawl frequency below one hour, using one hour"
            );
            1
        } else {
            state.frequency_hours
        };
        let next_run_time = now + chrono::Duration::hours(frequency_hours);

        self.state
            .mark_running(now, next_run_time)
            .map_err(|e| SchedulerError::state_access("mark_running", format!("{e:#}")))?;

        info!(
            started_at = %now,
            next_run_time = %next_run_time,
            "Crawl cycle started"
        );

        let cycle = self.run_cycle(shutdown).await;

        let idle = self
            .state
            .mark_idle()
            .map_err(|e| SchedulerError::state_access("mark_idle", format!("{e:#}")));

        let report = cycle?;
        idle?;
        Ok(PollOutcome::Completed(report))
    }

    async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> Result<CycleReport> {
        let sync = self.synchronizer.synchronize()?;
        let items = self
            .pool
            .work_items()
            .map_err(|e| SchedulerError::PoolUnavailable {
                reason: format!("{e:#}"),
            })?;

        let mut report = CycleReport {
            sync,
            ..Default::default()
        };

        for item in &items {
            if *shutdown.borrow() {
                info!("Shutdown requested, stopping crawl cycle early");
                report.interrupted = true;
                break;
            }

            let Some(unit) = self.registry.resolve(&item.key.target) else {
                warn!(
                    target_name = %item.key.target,
                    keyword = %item.key.keyword,
                    "No work unit registered for target, skipping"
                );
                report.skipped += 1;
                continue;
            };

            report.processed += 1;
            let params = WorkParameters::from(item);

            match self.execute_unit(unit.as_ref(), &params).await {
                Ok(stored) => {
                    report.succeeded += 1;
                    report.stored += stored;
                    debug!(item = %item.key, stored, "Work unit finished");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        item = %item.key,
                        category = e.category().as_str(),
                        recoverable = e.is_recoverable(),
                        error = %e,
                        "Work unit failed"
                    );
                }
            }
        }

        info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            stored = report.stored,
            "Crawl cycle finished"
        );

        Ok(report)
    }

    async fn execute_unit(&self, unit: &dyn WorkUnit, params: &WorkParameters) -> Result<usize> {
        let items = unit.execute(params).await?;
        unit.persist(&items, self.results.as_ref())
    }

    /// Poll until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            units = self.registry.len(),
            "Crawl scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let wait = match self.poll_once(Utc::now(), &shutdown).await {
                Ok(PollOutcome::Disabled) => self.poll_interval,
                Ok(PollOutcome::NotDue { wait }) => wait,
                Ok(PollOutcome::Completed(_)) => Duration::ZERO,
                Err(e) => {
                    // both kinds back off and retry; only the severity differs
                    if e.is_recoverable() {
                        warn!(
                            category = e.category().as_str(),
                            error = %e,
                            backoff_secs = self.failure_backoff.as_secs(),
                            "Scheduler iteration failed, retrying after backoff"
                        );
                    } else {
                        error!(
                            category = e.category().as_str(),
                            error = %e,
                            backoff_secs = self.failure_backoff.as_secs(),
                            "Scheduler iteration failed and needs attention"
                        );
                    }
                    self.failure_backoff
                }
            };

            if !wait.is_zero() && sleep_or_shutdown(wait, &mut shutdown).await {
                break;
            }
        }

        info!("Crawl scheduler stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::{CrawlerState, NewPendingItem, WorkDefinition};
    use crate::storage::{CrawlerStateRepository, DefinitionRepository, MemoryStore};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Arc;

    struct StaticUnit {
        name: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl WorkUnit for StaticUnit {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, params: &WorkParameters) -> Result<Vec<NewPendingItem>> {
            if self.fail {
                return Err(Error::other("site unreachable"));
            }
            Ok(vec![NewPendingItem {
                category: params.category.clone(),
                definitions: params.definitions.clone(),
                keyword: params.keyword.clone(),
                target: params.target.clone(),
                title: format!("{} news", params.keyword),
                detail_url: format!("https://{}/{}", params.target, params.keyword),
                published_at: None,
                publisher: None,
                crawled_at: Utc::now(),
            }])
        }
    }

    fn at(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(hours)
    }

    fn scheduler(store: &Arc<MemoryStore>, units: Vec<StaticUnit>) -> CrawlScheduler {
        let mut registry = WorkUnitRegistry::new();
        for unit in units {
            registry.register(Arc::new(unit));
        }
        CrawlScheduler::new(
            store.clone(),
            PoolSynchronizer::new(store.clone(), store.clone()),
            store.clone(),
            store.clone(),
            registry,
            &SchedulerConfig::default(),
        )
    }

    fn seed(store: &MemoryStore) {
        store.save_state(&CrawlerState::new(2)).unwrap();
        store
            .upsert_definition(&WorkDefinition {
                name: "watch".into(),
                keywords: vec!["steel".into(), "copper".into()],
                targets: vec!["siteA".into(), "siteB".into(), "siteC".into()],
                source_urls: vec![],
                category: "metals".into(),
                owner: None,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_failing_unit_does_not_abort_cycle() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let scheduler = scheduler(
            &store,
            vec![
                StaticUnit { name: "siteA", fail: false },
                StaticUnit { name: "siteB", fail: true },
            ],
        );
        let (_tx, rx) = watch::channel(false);

        let outcome = scheduler.poll_once(at(0), &rx).await.unwrap();
        let PollOutcome::Completed(report) = outcome else {
            panic!("expected a completed cycle, got {outcome:?}");
        };

        assert_eq!(report.sync.written, 6);
        assert_eq!(report.processed, 4);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.stored, 2);

        let state = store.load_state().unwrap().unwrap();
        assert_eq!(state.status, RunStatus::Idle);
        assert_eq!(state.last_run_time, Some(at(0)));
        assert_eq!(state.next_run_time, Some(at(2)));
    }

    #[tokio::test]
    async fn test_not_due_waits_at_most_one_poll_interval() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let scheduler = scheduler(&store, vec![]);
        let (_tx, rx) = watch::channel(false);

        scheduler.poll_once(at(0), &rx).await.unwrap();

        let early = at(1);
        assert_eq!(
            scheduler.poll_once(early, &rx).await.unwrap(),
            PollOutcome::NotDue {
                wait: Duration::from_secs(60)
            }
        );

        let almost = at(2) - chrono::Duration::seconds(10);
        assert_eq!(
            scheduler.poll_once(almost, &rx).await.unwrap(),
            PollOutcome::NotDue {
                wait: Duration::from_secs(10)
            }
        );
    }

    #[tokio::test]
    async fn test_disabled_switch_leaves_state_untouched() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        store.set_switch(false).unwrap();
        let scheduler = scheduler(&store, vec![]);
        let (_tx, rx) = watch::channel(false);

        assert_eq!(
            scheduler.poll_once(at(0), &rx).await.unwrap(),
            PollOutcome::Disabled
        );
        let state = store.load_state().unwrap().unwrap();
        assert_eq!(state.next_run_time, None);
        assert_eq!(state.status, RunStatus::Idle);
    }

    #[tokio::test]
    async fn test_missing_state_is_data_integrity_error() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(&store, vec![]);
        let (_tx, rx) = watch::channel(false);

        let err = scheduler.poll_once(at(0), &rx).await.unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::DataIntegrity);
    }

    #[tokio::test]
    async fn test_stale_running_flag_is_cleared_when_not_due() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        store.mark_running(at(0), at(2)).unwrap();
        let scheduler = scheduler(&store, vec![]);
        let (_tx, rx) = watch::channel(false);

        scheduler.poll_once(at(1), &rx).await.unwrap();
        assert_eq!(
            store.load_state().unwrap().unwrap().status,
            RunStatus::Idle
        );
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_cycle_and_still_goes_idle() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let scheduler = scheduler(&store, vec![StaticUnit { name: "siteA", fail: false }]);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let PollOutcome::Completed(report) = scheduler.poll_once(at(0), &rx).await.unwrap() else {
            panic!("expected a completed cycle");
        };
        assert!(report.interrupted);
        assert_eq!(report.processed, 0);
        assert_eq!(
            store.load_state().unwrap().unwrap().status,
            RunStatus::Idle
        );
    }
}
