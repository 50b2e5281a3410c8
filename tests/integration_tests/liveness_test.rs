//! Heartbeats, watchdogs and recovery over a SQLite file

use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use tidings::config::{Config, SchedulerConfig};
use tidings::fanout::PoolSynchronizer;
use tidings::liveness::{HeartbeatPublisher, Verdict, Watchdog};
use tidings::models::{ChannelStatus, HeartbeatChannel, RunStatus};
use tidings::runtime::{crawl_watchdog, dispatch_watchdog};
use tidings::scheduler::{CrawlScheduler, PollOutcome, WorkUnitRegistry};
use tidings::storage::{seed_state, CrawlerStateRepository, DefinitionRepository, HeartbeatRepository};

use crate::common::{at, definition, sqlite_store, EchoUnit};

fn config_with_timeout(secs: u64) -> Config {
    let mut config = Config::default();
    config.liveness.timeout_secs = secs;
    config
}

#[tokio::test]
async fn test_watchdog_threshold_is_strict() {
    let (_dir, store) = sqlite_store();
    seed_state(store.as_ref(), 6).unwrap();
    store.mark_running(at(0), at(6 * 3600)).unwrap();

    let config = config_with_timeout(60);
    HeartbeatPublisher::new(HeartbeatChannel::Crawl, store.clone(), &config.liveness)
        .publish(at(0))
        .unwrap();

    let watchdog = crawl_watchdog(store.clone(), &config);

    assert!(matches!(watchdog.check(at(60)).unwrap(), Verdict::Healthy { .. }));
    assert_eq!(
        store.load_state().unwrap().unwrap().status,
        RunStatus::Running
    );

    assert!(matches!(watchdog.check(at(61)).unwrap(), Verdict::Stale { .. }));
    assert_eq!(store.load_state().unwrap().unwrap().status, RunStatus::Idle);
}

#[tokio::test]
async fn test_missing_channel_is_not_recovered() {
    let (_dir, store) = sqlite_store();
    let config = config_with_timeout(60);
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();

    let watchdog = Watchdog::new(
        HeartbeatChannel::Dispatch,
        store.clone(),
        move |_channel: HeartbeatChannel, _age: chrono::Duration| -> anyhow::Result<()> {
            *counter.lock().unwrap() += 1;
            Ok(())
        },
        &config.liveness,
    );

    assert_eq!(watchdog.check(at(0)).unwrap(), Verdict::Missing);
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_dispatch_watchdog_marks_channel_down() {
    let (_dir, store) = sqlite_store();
    store.beat(HeartbeatChannel::Dispatch, at(0)).unwrap();

    let watchdog = dispatch_watchdog(store.clone(), &config_with_timeout(60));
    watchdog.check(at(120)).unwrap();

    let record = store.heartbeat(HeartbeatChannel::Dispatch).unwrap().unwrap();
    assert_eq!(record.status, ChannelStatus::Down);

    // A fresh beat brings the channel back
    store.beat(HeartbeatChannel::Dispatch, at(130)).unwrap();
    let record = store.heartbeat(HeartbeatChannel::Dispatch).unwrap().unwrap();
    assert_eq!(record.status, ChannelStatus::Up);
}

#[tokio::test]
async fn test_crashed_crawl_is_recovered_and_runs_again() {
    let (_dir, store) = sqlite_store();
    seed_state(store.as_ref(), 6).unwrap();
    store
        .upsert_definition(&definition("d1", &["steel"], &["siteA"], "tender"))
        .unwrap();

    // A cycle started seven hours ago and its process died mid-run
    store.mark_running(at(-7 * 3600), at(-3600)).unwrap();
    store.beat(HeartbeatChannel::Crawl, at(-7 * 3600)).unwrap();

    let config = config_with_timeout(300);
    let verdict = crawl_watchdog(store.clone(), &config).check(at(0)).unwrap();
    assert!(matches!(verdict, Verdict::Stale { .. }));
    assert_eq!(store.load_state().unwrap().unwrap().status, RunStatus::Idle);

    let unit = EchoUnit::new("siteA");
    let mut registry = WorkUnitRegistry::new();
    registry.register(unit.clone());
    let scheduler = CrawlScheduler::new(
        store.clone(),
        PoolSynchronizer::new(store.clone(), store.clone()),
        store.clone(),
        store.clone(),
        registry,
        &SchedulerConfig::default(),
    );
    let (_tx, rx) = watch::channel(false);

    assert!(matches!(
        scheduler.poll_once(at(0), &rx).await.unwrap(),
        PollOutcome::Completed(_)
    ));
    assert_eq!(unit.calls.lock().unwrap().len(), 1);
    assert_eq!(
        store.load_state().unwrap().unwrap().next_run_time,
        Some(at(6 * 3600))
    );
}
