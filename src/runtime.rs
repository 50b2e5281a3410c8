//! Wiring of the long-running loops
//!
//! Each scheduling domain is one loop plus a heartbeat publisher; watchdogs
//! can run beside them or in a separate `watch` process against the same
//! database.
//!
//! ```text
//!   crawl:     CrawlScheduler   + HeartbeatPublisher(crawl)    [+ Watchdog(crawl)]
//!   dispatch:  DispatchCycle    + HeartbeatPublisher(dispatch) [+ Watchdog(dispatch)]
//! ```

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::crawler::build_registry;
use crate::dispatch::{DispatchCycle, MailTransport, ResourcePool, SmtpTransport};
use crate::error::Result;
use crate::fanout::PoolSynchronizer;
use crate::liveness::{HeartbeatPublisher, MarkChannelDown, ResetCrawlerState, Watchdog};
use crate::models::HeartbeatChannel;
use crate::scheduler::CrawlScheduler;
use crate::storage::{seed_state, Store};

// ============================================================================
// Builders
// ============================================================================

/// Crawl scheduler over `store` with the configured targets
pub fn crawl_scheduler<S: Store + 'static>(store: Arc<S>, config: &Config) -> Result<CrawlScheduler> {
    seed_state(store.as_ref(), config.scheduler.default_frequency_hours)?;
    let registry = build_registry(&config.crawler)?;
    let synchronizer = PoolSynchronizer::new(store.clone(), store.clone());

    Ok(CrawlScheduler::new(
        store.clone(),
        synchronizer,
        store.clone(),
        store,
        registry,
        &config.scheduler,
    ))
}

/// Dispatcher over `store` using SMTP
pub fn dispatch_cycle<S: Store + 'static>(store: Arc<S>, config: &Config) -> Result<DispatchCycle> {
    let transport: Arc<dyn MailTransport> = Arc::new(SmtpTransport::from_config(&config.dispatch));
    dispatch_cycle_with(store, transport, config)
}

/// Dispatcher over `store` with a caller-supplied transport
pub fn dispatch_cycle_with<S: Store + 'static>(
    store: Arc<S>,
    transport: Arc<dyn MailTransport>,
    config: &Config,
) -> Result<DispatchCycle> {
    if config.dispatch.accounts.is_empty() {
        warn!("No outbound accounts configured, notifications will be deferred");
    }
    let pool = ResourcePool::from_config(&config.dispatch, store.clone());
    DispatchCycle::new(store.clone(), store, pool, transport, &config.dispatch)
}

pub fn crawl_watchdog<S: Store + 'static>(store: Arc<S>, config: &Config) -> Watchdog<ResetCrawlerState> {
    Watchdog::new(
        HeartbeatChannel::Crawl,
        store.clone(),
        ResetCrawlerState::new(store),
        &config.liveness,
    )
}

pub fn dispatch_watchdog<S: Store + 'static>(store: Arc<S>, config: &Config) -> Watchdog<MarkChannelDown> {
    Watchdog::new(
        HeartbeatChannel::Dispatch,
        store.clone(),
        MarkChannelDown::new(store),
        &config.liveness,
    )
}

// ============================================================================
// Service handle
// ============================================================================

/// Owns the spawned tasks and their shared shutdown signal
pub struct ServiceHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for ServiceHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceHandle {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// A receiver for tasks spawned outside this handle
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn track(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.push((name, handle));
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(name, _)| *name).collect()
    }

    /// Check if every task is still running
    pub fn is_running(&self) -> bool {
        self.tasks.iter().all(|(_, handle)| !handle.is_finished())
    }

    /// Signal shutdown and wait for every task
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);

        let (names, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        for (name, result) in names.into_iter().zip(join_all(handles).await) {
            match result {
                Ok(()) => info!(task = name, "Task stopped"),
                Err(e) => warn!(task = name, error = %e, "Task ended abnormally"),
            }
        }
    }
}

/// Which parts of the service to spawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Components {
    pub crawl: bool,
    pub dispatch: bool,
    pub watchdogs: bool,
}

impl Components {
    pub const ALL: Self = Self {
        crawl: true,
        dispatch: true,
        watchdogs: true,
    };

    pub const WATCHDOGS: Self = Self {
        crawl: false,
        dispatch: false,
        watchdogs: true,
    };
}

/// Spawn the selected loops, each with its heartbeat publisher
pub fn start<S: Store + 'static>(
    store: Arc<S>,
    config: &Config,
    components: Components,
) -> Result<ServiceHandle> {
    let mut handle = ServiceHandle::new();

    if components.crawl {
        let scheduler = crawl_scheduler(store.clone(), config)?;
        handle.track("crawl-scheduler", scheduler.spawn(handle.subscribe()));
        handle.track(
            "crawl-heartbeat",
            HeartbeatPublisher::new(HeartbeatChannel::Crawl, store.clone(), &config.liveness)
                .spawn(handle.subscribe()),
        );
    }

    if components.dispatch {
        let dispatcher = dispatch_cycle(store.clone(), config)?;
        handle.track("dispatcher", dispatcher.spawn(handle.subscribe()));
        handle.track(
            "dispatch-heartbeat",
            HeartbeatPublisher::new(HeartbeatChannel::Dispatch, store.clone(), &config.liveness)
                .spawn(handle.subscribe()),
        );
    }

    if components.watchdogs {
        handle.track(
            "crawl-watchdog",
            crawl_watchdog(store.clone(), config).spawn(handle.subscribe()),
        );
        handle.track(
            "dispatch-watchdog",
            dispatch_watchdog(store, config).spawn(handle.subscribe()),
        );
    }

    info!(tasks = ?handle.task_names(), "Services started");
    Ok(handle)
}
