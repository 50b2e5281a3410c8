//! Crawl scheduling over a SQLite file
//!
//! Covers the path definitions → work pool → work units → result store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use tidings::config::SchedulerConfig;
use tidings::fanout::PoolSynchronizer;
use tidings::models::{RunStatus, WorkKey};
use tidings::scheduler::{CrawlScheduler, PollOutcome, WorkUnitRegistry};
use tidings::storage::{
    seed_state, CrawlerStateRepository, DefinitionRepository, ResultRepository, SqliteStore,
    WorkPoolRepository,
};

use crate::common::{at, definition, sqlite_store, EchoUnit};

fn scheduler(store: &Arc<SqliteStore>, units: Vec<Arc<EchoUnit>>) -> CrawlScheduler {
    let mut registry = WorkUnitRegistry::new();
    for unit in units {
        registry.register(unit);
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

#[tokio::test]
async fn test_overlapping_definitions_merge_into_one_item() {
    let (_dir, store) = sqlite_store();
    store
        .upsert_definition(&definition("d1", &["steel"], &["siteA"], "tender"))
        .unwrap();
    store
        .upsert_definition(&definition("d2", &["steel", "copper"], &["siteA"], "bid"))
        .unwrap();
    store
        .upsert_definition(&definition("d3", &["steel"], &["siteA", "siteB"], "notice"))
        .unwrap();

    let report = PoolSynchronizer::new(store.clone(), store.clone())
        .synchronize()
        .unwrap();
    assert_eq!(report.definitions, 3);
    assert_eq!(report.combinations, 3);
    assert_eq!(report.written, 3);

    let items = store.work_items().unwrap();
    let merged = items
        .iter()
        .find(|item| item.key == WorkKey::new("steel", "siteA"))
        .unwrap();
    assert_eq!(merged.category, "tender");
    assert_eq!(
        merged.definitions.iter().cloned().collect::<Vec<_>>(),
        vec!["d1", "d2", "d3"]
    );
}

#[tokio::test]
async fn test_cycle_runs_units_and_anchors_next_run() {
    let (_dir, store) = sqlite_store();
    seed_state(store.as_ref(), 6).unwrap();
    store
        .upsert_definition(&definition("d1", &["steel", "iron"], &["siteA"], "tender"))
        .unwrap();

    let unit = EchoUnit::new("siteA");
    let scheduler = scheduler(&store, vec![unit.clone()]);
    let (_tx, rx) = watch::channel(false);

    let outcome = scheduler.poll_once(at(0), &rx).await.unwrap();
    let PollOutcome::Completed(report) = outcome else {
        panic!("expected a completed cycle, got {outcome:?}");
    };
    assert_eq!(report.processed, 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.stored, 2);
    assert_eq!(unit.calls.lock().unwrap().len(), 2);

    let state = store.load_state().unwrap().unwrap();
    assert_eq!(state.status, RunStatus::Idle);
    assert_eq!(state.last_run_time, Some(at(0)));
    assert_eq!(state.next_run_time, Some(at(6 * 3600)));

    let stored = store.undelivered().unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|item| item.category == "tender"));
}

#[tokio::test]
async fn test_not_due_waits_at_most_the_poll_interval() {
    let (_dir, store) = sqlite_store();
    seed_state(store.as_ref(), 6).unwrap();
    let unit = EchoUnit::new("siteA");
    let scheduler = scheduler(&store, vec![unit.clone()]);
    let (_tx, rx) = watch::channel(false);

    assert!(matches!(
        scheduler.poll_once(at(0), &rx).await.unwrap(),
        PollOutcome::Completed(_)
    ));

    match scheduler.poll_once(at(3600), &rx).await.unwrap() {
        PollOutcome::NotDue { wait } => {
            assert!(wait <= Duration::from_secs(60));
            assert!(wait > Duration::ZERO);
        }
        other => panic!("expected NotDue, got {other:?}"),
    }

    // Exactly at the anchored time the next cycle fires
    assert!(matches!(
        scheduler.poll_once(at(6 * 3600), &rx).await.unwrap(),
        PollOutcome::Completed(_)
    ));
}

#[tokio::test]
async fn test_failing_unit_does_not_stop_the_cycle() {
    let (_dir, store) = sqlite_store();
    seed_state(store.as_ref(), 1).unwrap();
    store
        .upsert_definition(&definition("d1", &["steel"], &["siteA", "siteB", "siteC"], "tender"))
        .unwrap();

    let scheduler = scheduler(
        &store,
        vec![EchoUnit::failing("siteA"), EchoUnit::new("siteB")],
    );
    let (_tx, rx) = watch::channel(false);

    let PollOutcome::Completed(report) = scheduler.poll_once(at(0), &rx).await.unwrap() else {
        panic!("expected a completed cycle");
    };
    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(
        store.load_state().unwrap().unwrap().status,
        RunStatus::Idle
    );
}

#[tokio::test]
async fn test_switched_off_crawler_does_nothing() {
    let (_dir, store) = sqlite_store();
    seed_state(store.as_ref(), 1).unwrap();
    store.set_switch(false).unwrap();
    store
        .upsert_definition(&definition("d1", &["steel"], &["siteA"], "tender"))
        .unwrap();

    let unit = EchoUnit::new("siteA");
    let scheduler = scheduler(&store, vec![unit.clone()]);
    let (_tx, rx) = watch::channel(false);

    assert_eq!(
        scheduler.poll_once(at(0), &rx).await.unwrap(),
        PollOutcome::Disabled
    );
    assert!(unit.calls.lock().unwrap().is_empty());
    assert!(store.work_items().unwrap().is_empty());
}

#[tokio::test]
async fn test_state_survives_reopening_the_database() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("tidings.db");

    {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        seed_state(store.as_ref(), 3).unwrap();
        let scheduler = scheduler(&store, vec![]);
        let (_tx, rx) = watch::channel(false);
        scheduler.poll_once(at(0), &rx).await.unwrap();
    }

    let reopened = SqliteStore::open(&path).unwrap();
    assert!(!seed_state(&reopened, 12).unwrap());
    let state = reopened.load_state().unwrap().unwrap();
    assert_eq!(state.frequency_hours, 3);
    assert_eq!(state.next_run_time, Some(at(3 * 3600)));
}
