use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;

use tidings::config::Config;
use tidings::fanout::PoolSynchronizer;
use tidings::models::{HeartbeatChannel, Recipient, WorkDefinition};
use tidings::storage::{
    seed_state, CrawlerStateRepository, DefinitionRepository, HeartbeatRepository,
    ResultRepository, SubscriberRepository, WorkPoolRepository,
};

use super::open_store;

/// Definitions and recipients to load in bulk
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeedFile {
    definitions: Vec<WorkDefinition>,
    recipients: Vec<RecipientEntry>,
}

#[derive(Debug, Deserialize)]
struct RecipientEntry {
    identity: String,
    address: String,
    #[serde(default)]
    categories: BTreeSet<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl From<RecipientEntry> for Recipient {
    fn from(entry: RecipientEntry) -> Self {
        Self {
            identity: entry.identity,
            address: entry.address,
            categories: entry.categories,
            enabled: entry.enabled,
        }
    }
}

/// Create the schema, the crawler state and both heartbeat rows
pub fn init(config: Config, frequency_hours: Option<i64>) -> Result<()> {
    let store = open_store(&config)?;
    let frequency = frequency_hours.unwrap_or(config.scheduler.default_frequency_hours);

    if seed_state(store.as_ref(), frequency)? {
        println!("Crawler state created (every {frequency}h)");
    } else {
        println!("Crawler state already present");
    }

    let now = Utc::now();
    for channel in HeartbeatChannel::ALL {
        if store.heartbeat(channel)?.is_none() {
            store.beat(channel, now)?;
            println!("Heartbeat channel '{channel}' created");
        }
    }

    println!(
        "Database ready at {}",
        config.database.sqlite_path.display()
    );
    Ok(())
}

/// Upsert definitions and recipients from a TOML file
pub fn load(config: Config, file: &Path, sync_after: bool) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let seed: SeedFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", file.display()))?;

    let store = open_store(&config)?;

    for definition in &seed.definitions {
        store
            .upsert_definition(definition)
            .with_context(|| format!("Failed to store definition '{}'", definition.name))?;
    }
    let recipients = seed.recipients.len();
    for entry in seed.recipients {
        let recipient = Recipient::from(entry);
        store
            .upsert_recipient(&recipient)
            .with_context(|| format!("Failed to store recipient '{}'", recipient.identity))?;
    }

    println!(
        "Loaded {} definitions and {} recipients",
        seed.definitions.len(),
        recipients
    );

    if sync_after {
        let report = PoolSynchronizer::new(store.clone(), store).synchronize()?;
        println!("Work pool now holds {} items", report.written);
    }
    Ok(())
}

/// Delete one definition by name
pub fn remove(config: Config, name: &str) -> Result<()> {
    let store = open_store(&config)?;
    if store.remove_definition(name)? {
        println!("Definition '{name}' removed; the pool changes on the next sync");
    } else {
        println!("No definition named '{name}'");
    }
    Ok(())
}

/// One synchronization pass
pub fn sync(config: Config) -> Result<()> {
    let store = open_store(&config)?;
    let report = PoolSynchronizer::new(store.clone(), store).synchronize()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Change the crawl switch or frequency
pub fn schedule(config: Config, enabled: Option<bool>, frequency_hours: Option<i64>) -> Result<()> {
    let store = open_store(&config)?;
    seed_state(store.as_ref(), config.scheduler.default_frequency_hours)?;

    if let Some(enabled) = enabled {
        store.set_switch(enabled)?;
        println!("Crawler switched {}", if enabled { "on" } else { "off" });
    }
    if let Some(hours) = frequency_hours {
        anyhow::ensure!(hours >= 1, "frequency must be at least one hour");
        store.set_frequency(hours)?;
        println!("Crawl frequency set to every {hours}h");
    }
    Ok(())
}

/// Print crawler state, heartbeat ages and queue sizes
pub fn status(config: Config) -> Result<()> {
    let store = open_store(&config)?;
    let now = Utc::now();

    println!("Crawler");
    println!("=======");
    match store.load_state()? {
        Some(state) => {
            let format_time = |t: Option<chrono::DateTime<Utc>>| {
                t.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| "never".to_string())
            };
            println!("  Switch:    {}", if state.switch { "on" } else { "off" });
            println!("  Status:    {}", state.status);
            println!("  Frequency: every {}h", state.frequency_hours);
            println!("  Last run:  {}", format_time(state.last_run_time));
            println!("  Next run:  {}", format_time(state.next_run_time));
        }
        None => println!("  Not initialized, run `tidings init`"),
    }

    println!();
    println!("Heartbeats");
    println!("==========");
    let heartbeats = store.heartbeats()?;
    if heartbeats.is_empty() {
        println!("  No heartbeat recorded");
    }
    for record in heartbeats {
        let age = (now - record.last_beat).num_seconds();
        let stale = age > config.liveness.timeout_secs as i64;
        println!(
            "  {:<9} {:<5} {}s ago{}",
            record.channel.as_str(),
            record.status.as_str(),
            age,
            if stale { " (stale)" } else { "" }
        );
    }

    println!();
    println!("Queues");
    println!("======");
    println!("  Definitions: {}", store.definitions()?.len());
    println!("  Work items:  {}", store.work_items()?.len());
    println!("  Undelivered: {}", store.undelivered()?.len());
    println!("  Recipients:  {}", store.subscribers()?.len());
    Ok(())
}
