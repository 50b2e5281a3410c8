use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::watch;

use tidings::config::Config;
use tidings::runtime::{self, Components, ServiceHandle};
use tidings::scheduler::PollOutcome;

use super::open_store;

async fn wait_for_shutdown(handle: ServiceHandle) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl+C")?;
    println!("\nShutdown signal received, stopping...");
    handle.shutdown().await;
    Ok(())
}

/// Both loops, their publishers and optionally the watchdogs
pub async fn run(config: Config, with_watchdogs: bool) -> Result<()> {
    let store = open_store(&config)?;
    let handle = runtime::start(
        store,
        &config,
        Components {
            crawl: true,
            dispatch: true,
            watchdogs: with_watchdogs,
        },
    )?;

    println!("tidings running, press Ctrl+C to stop");
    wait_for_shutdown(handle).await?;
    println!("tidings stopped.");
    Ok(())
}

/// The crawl scheduler alone, or a single poll with `once`
pub async fn crawl(config: Config, once: bool) -> Result<()> {
    let store = open_store(&config)?;

    if once {
        let scheduler = runtime::crawl_scheduler(store, &config)?;
        let (_shutdown, rx) = watch::channel(false);
        match scheduler.poll_once(Utc::now(), &rx).await? {
            PollOutcome::Disabled => println!("Crawler is switched off."),
            PollOutcome::NotDue { wait } => {
                println!("Crawl not due yet, next check in {}s.", wait.as_secs())
            }
            PollOutcome::Completed(report) => {
                println!("{}", serde_json::to_string_pretty(&report)?)
            }
        }
        return Ok(());
    }

    let handle = runtime::start(
        store,
        &config,
        Components {
            crawl: true,
            dispatch: false,
            watchdogs: false,
        },
    )?;
    wait_for_shutdown(handle).await
}

/// The dispatcher alone, or a single cycle with `once`
pub async fn dispatch(config: Config, once: bool) -> Result<()> {
    let store = open_store(&config)?;

    if once {
        let mut cycle = runtime::dispatch_cycle(store, &config)?;
        let report = cycle.run_cycle(Utc::now()).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let handle = runtime::start(
        store,
        &config,
        Components {
            crawl: false,
            dispatch: true,
            watchdogs: false,
        },
    )?;
    wait_for_shutdown(handle).await
}

/// Both watchdogs, for running beside the loops in another process
pub async fn watch(config: Config) -> Result<()> {
    let store = open_store(&config)?;
    let handle = runtime::start(store, &config, Components::WATCHDOGS)?;
    wait_for_shutdown(handle).await
}
