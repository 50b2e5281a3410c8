//! Common test utilities

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use tidings::dispatch::{
    MailSession, MailTransport, OutboundAccount, OutgoingMessage, TransportError,
};
use tidings::error::{Error, Result};
use tidings::models::{NewPendingItem, Recipient, WorkDefinition};
use tidings::scheduler::work::{WorkParameters, WorkUnit};
use tidings::storage::SqliteStore;

/// A fixed instant on 2025-06-02, offset by `secs`
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

/// SQLite store in a temporary directory; keep the directory alive
pub fn sqlite_store() -> (TempDir, Arc<SqliteStore>) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(dir.path().join("tidings.db")).unwrap();
    (dir, Arc::new(store))
}

pub fn definition(name: &str, keywords: &[&str], targets: &[&str], category: &str) -> WorkDefinition {
    WorkDefinition {
        name: name.to_string(),
        keywords: keywords.iter().map(|s| s.to_string()).collect(),
        targets: targets.iter().map(|s| s.to_string()).collect(),
        source_urls: vec![],
        category: category.to_string(),
        owner: None,
    }
}

pub fn recipient(identity: &str, categories: &[&str]) -> Recipient {
    Recipient {
        identity: identity.to_string(),
        address: format!("{identity}@example.com"),
        categories: categories.iter().map(|s| s.to_string()).collect(),
        enabled: true,
    }
}

pub fn pending(url: &str, category: &str, crawled_at: DateTime<Utc>) -> NewPendingItem {
    NewPendingItem {
        category: category.to_string(),
        definitions: vec!["d1".to_string()],
        keyword: "steel".to_string(),
        target: "siteA".to_string(),
        title: format!("steel notice {url}"),
        detail_url: url.to_string(),
        published_at: None,
        publisher: None,
        crawled_at,
    }
}

pub fn account(identity: &str, daily_limit: u32) -> OutboundAccount {
    OutboundAccount {
        identity: identity.to_string(),
        credential: "app-password".to_string(),
        host: "smtp.example.com".to_string(),
        port: 587,
        starttls: true,
        daily_limit,
    }
}

// ============================================================================
// Work units
// ============================================================================

/// Returns one result per call, or fails when `fail` is set
pub struct EchoUnit {
    name: String,
    fail: bool,
    pub calls: Mutex<Vec<WorkParameters>>,
}

impl EchoUnit {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail: false,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail: true,
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl WorkUnit for EchoUnit {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, params: &WorkParameters) -> Result<Vec<NewPendingItem>> {
        self.calls.lock().unwrap().push(params.clone());
        if self.fail {
            return Err(Error::other(format!("{} is unreachable", self.name)));
        }

        Ok(vec![NewPendingItem {
            category: params.category.clone(),
            definitions: params.definitions.clone(),
            keyword: params.keyword.clone(),
            target: params.target.clone(),
            title: format!("{} notice", params.keyword),
            detail_url: format!("https://{}/{}", params.target, params.keyword),
            published_at: None,
            publisher: None,
            crawled_at: Utc::now(),
        }])
    }
}

// ============================================================================
// Mail transport
// ============================================================================

/// Records what would have been sent
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<(String, OutgoingMessage)>>,
    pub refuse: HashSet<String>,
}

impl RecordingTransport {
    pub fn recipients(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.to.clone())
            .collect()
    }
}

pub struct RecordingTransportHandle(pub Arc<RecordingTransport>);

struct RecordingSession {
    account: String,
    transport: Arc<RecordingTransport>,
}

#[async_trait]
impl MailTransport for RecordingTransportHandle {
    async fn connect(
        &self,
        account: &OutboundAccount,
    ) -> std::result::Result<Box<dyn MailSession>, TransportError> {
        if self.0.refuse.contains(&account.identity) {
            return Err(TransportError::Connect {
                account: account.identity.clone(),
                attempts: 3,
                reason: "connection refused".to_string(),
            });
        }
        Ok(Box::new(RecordingSession {
            account: account.identity.clone(),
            transport: self.0.clone(),
        }))
    }
}

#[async_trait]
impl MailSession for RecordingSession {
    async fn send(&mut self, message: &OutgoingMessage) -> std::result::Result<(), TransportError> {
        self.transport
            .sent
            .lock()
            .unwrap()
            .push((self.account.clone(), message.clone()));
        Ok(())
    }

    async fn close(self: Box<Self>) {}
}
