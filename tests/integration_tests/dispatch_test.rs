//! Notification dispatch over a SQLite file
//!
//! Covers the path result store → recipients → account pool → transport,
//! including the daily quota rollover.

use std::sync::Arc;

use tidings::config::{AccountConfig, Config};
use tidings::dispatch::{DispatchCycle, MailTransport};
use tidings::runtime::dispatch_cycle_with;
use tidings::storage::{ResultRepository, SqliteStore, SubscriberRepository};

use crate::common::{at, pending, recipient, sqlite_store, RecordingTransport, RecordingTransportHandle};

fn config_with_accounts(accounts: &[&str], daily_limit: u32) -> Config {
    let mut config = Config::default();
    config.dispatch.accounts = accounts
        .iter()
        .map(|identity| AccountConfig {
            identity: identity.to_string(),
            credential: "app-password".to_string(),
            host: "smtp.example.com".to_string(),
            port: 587,
            starttls: true,
            daily_limit: Some(daily_limit),
        })
        .collect();
    config
}

fn cycle(
    store: &Arc<SqliteStore>,
    transport: &Arc<RecordingTransport>,
    config: &Config,
) -> DispatchCycle {
    let transport: Arc<dyn MailTransport> =
        Arc::new(RecordingTransportHandle(transport.clone()));
    dispatch_cycle_with(store.clone(), transport, config).unwrap()
}

#[tokio::test]
async fn test_items_reach_only_subscribed_recipients() {
    let (_dir, store) = sqlite_store();
    store.upsert_recipient(&recipient("alice", &["tender"])).unwrap();
    store.upsert_recipient(&recipient("bob", &["bid"])).unwrap();
    store
        .append(&[
            pending("https://a.example/1", "tender", at(-60)),
            pending("https://a.example/2", "tender", at(-50)),
            pending("https://a.example/3", "bid", at(-40)),
            pending("https://a.example/4", "award", at(-30)),
        ])
        .unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let config = config_with_accounts(&["sender@example.com"], 10);
    let report = cycle(&store, &transport, &config).run_cycle(at(0)).await.unwrap();

    assert_eq!(report.recipients, 2);
    assert_eq!(report.sent, 2);
    assert_eq!(report.unmatched, 1);

    let sent = transport.sent.lock().unwrap().clone();
    let alice = sent
        .iter()
        .find(|(_, message)| message.to == "alice@example.com")
        .map(|(_, message)| message)
        .unwrap();
    assert!(alice.html_body.contains("https://a.example/1"));
    assert!(alice.html_body.contains("https://a.example/2"));
    assert!(!alice.html_body.contains("https://a.example/3"));
    assert!(alice.subject.contains("alice"));

    let left: Vec<String> = store
        .undelivered()
        .unwrap()
        .into_iter()
        .map(|item| item.detail_url)
        .collect();
    assert_eq!(left, vec!["https://a.example/4"]);
}

#[tokio::test]
async fn test_quota_defers_then_rolls_over_next_day() {
    let (_dir, store) = sqlite_store();
    store.upsert_recipient(&recipient("alice", &["tender"])).unwrap();
    store.upsert_recipient(&recipient("bob", &["bid"])).unwrap();
    store.upsert_recipient(&recipient("carol", &["award"])).unwrap();
    store
        .append(&[
            pending("https://a.example/1", "tender", at(-60)),
            pending("https://a.example/2", "bid", at(-60)),
            pending("https://a.example/3", "award", at(-60)),
        ])
        .unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let config = config_with_accounts(&["one@example.com", "two@example.com"], 1);
    let mut dispatcher = cycle(&store, &transport, &config);

    let first = dispatcher.run_cycle(at(0)).await.unwrap();
    assert_eq!(first.sent, 2);
    assert_eq!(first.deferred, 1);
    assert!(first.pool_exhausted);

    let accounts: Vec<String> = transport
        .sent
        .lock()
        .unwrap()
        .iter()
        .map(|(account, _)| account.clone())
        .collect();
    assert_eq!(accounts, vec!["one@example.com", "two@example.com"]);

    // Same day: nothing left to send with
    let again = dispatcher.run_cycle(at(600)).await.unwrap();
    assert_eq!(again.sent, 0);
    assert_eq!(again.deferred, 1);

    // A day later the counters start over
    let next_day = dispatcher.run_cycle(at(86_400)).await.unwrap();
    assert_eq!(next_day.sent, 1);
    assert!(!next_day.pool_exhausted);
    assert_eq!(
        transport.recipients(),
        vec!["alice@example.com", "bob@example.com", "carol@example.com"]
    );
    assert!(store.undelivered().unwrap().is_empty());
}

#[tokio::test]
async fn test_quota_counts_survive_a_restart() {
    let (_dir, store) = sqlite_store();
    store.upsert_recipient(&recipient("alice", &["tender"])).unwrap();
    store
        .append(&[pending("https://a.example/1", "tender", at(-60))])
        .unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let config = config_with_accounts(&["one@example.com"], 1);
    cycle(&store, &transport, &config).run_cycle(at(0)).await.unwrap();

    store
        .append(&[pending("https://a.example/2", "tender", at(30))])
        .unwrap();

    // A fresh dispatcher reads the persisted counter
    let report = cycle(&store, &transport, &config).run_cycle(at(60)).await.unwrap();
    assert_eq!(report.sent, 0);
    assert_eq!(report.deferred, 1);
    assert_eq!(transport.recipients().len(), 1);
}

#[tokio::test]
async fn test_refused_account_is_skipped_for_the_cycle() {
    let (_dir, store) = sqlite_store();
    store.upsert_recipient(&recipient("alice", &["tender"])).unwrap();
    store
        .append(&[pending("https://a.example/1", "tender", at(-60))])
        .unwrap();

    let transport = Arc::new(RecordingTransport {
        refuse: ["one@example.com".to_string()].into_iter().collect(),
        ..Default::default()
    });
    let config = config_with_accounts(&["one@example.com", "two@example.com"], 5);
    let report = cycle(&store, &transport, &config).run_cycle(at(0)).await.unwrap();

    assert_eq!(report.sent, 1);
    let sent = transport.sent.lock().unwrap().clone();
    assert_eq!(sent[0].0, "two@example.com");
}

#[tokio::test]
async fn test_stale_results_are_swept_without_recipients() {
    let (_dir, store) = sqlite_store();
    store
        .append(&[
            pending("https://a.example/old", "tender", at(-25 * 3600)),
            pending("https://a.example/new", "tender", at(-3600)),
        ])
        .unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let config = config_with_accounts(&[], 1);
    let report = cycle(&store, &transport, &config).run_cycle(at(0)).await.unwrap();

    assert_eq!(report.recipients, 0);
    assert_eq!(report.swept, 1);
    let left: Vec<String> = store
        .undelivered()
        .unwrap()
        .into_iter()
        .map(|item| item.detail_url)
        .collect();
    assert_eq!(left, vec!["https://a.example/new"]);
}
