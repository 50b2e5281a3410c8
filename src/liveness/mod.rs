//! Heartbeat-based liveness monitoring
//!
//! Each background loop is paired with a [`HeartbeatPublisher`] that stamps
//! its channel every interval, and a [`Watchdog`] that reads the stamp back
//! and runs a [`RecoveryAction`] once it is older than the timeout. The
//! watchdog may live in a different process; the two only share the store.
//!
//! ```text
//!   crawl loop ──► HeartbeatPublisher(crawl) ──┐
//!                                              ▼
//!                                        heartbeats table
//!                                              │
//!        Watchdog(crawl, ResetCrawlerState) ◄──┘──► Watchdog(dispatch, MarkChannelDown)
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::LivenessConfig;
use crate::models::{ChannelStatus, HeartbeatChannel};
use crate::storage::{SharedCrawlerStateRepository, SharedHeartbeatRepository};

// ============================================================================
// Recovery actions
// ============================================================================

/// What a watchdog does when its channel goes quiet
pub trait RecoveryAction: Send + Sync {
    fn recover(&self, channel: HeartbeatChannel, age: chrono::Duration) -> Result<()>;
}

impl<F> RecoveryAction for F
where
    F: Fn(HeartbeatChannel, chrono::Duration) -> Result<()> + Send + Sync,
{
    fn recover(&self, channel: HeartbeatChannel, age: chrono::Duration) -> Result<()> {
        self(channel, age)
    }
}

/// Force the crawler state back to Idle so the next poll can run again
pub struct ResetCrawlerState {
    state: SharedCrawlerStateRepository,
}

impl ResetCrawlerState {
    pub fn new(state: SharedCrawlerStateRepository) -> Self {
        Self { state }
    }
}

impl RecoveryAction for ResetCrawlerState {
    fn recover(&self, channel: HeartbeatChannel, age: chrono::Duration) -> Result<()> {
        self.state
            .mark_idle()
            .context("Failed to reset crawler state")?;
        warn!(
            channel = %channel,
            age_secs = age.num_seconds(),
            "Crawler state forced back to idle"
        );
        Ok(())
    }
}

/// Flag the channel itself as down
pub struct MarkChannelDown {
    heartbeats: SharedHeartbeatRepository,
}

impl MarkChannelDown {
    pub fn new(heartbeats: SharedHeartbeatRepository) -> Self {
        Self { heartbeats }
    }
}

impl RecoveryAction for MarkChannelDown {
    fn recover(&self, channel: HeartbeatChannel, age: chrono::Duration) -> Result<()> {
        self.heartbeats
            .set_channel_status(channel, ChannelStatus::Down)
            .with_context(|| format!("Failed to mark {channel} down"))?;
        warn!(
            channel = %channel,
            age_secs = age.num_seconds(),
            "Channel marked down"
        );
        Ok(())
    }
}

// ============================================================================
// Publisher
// ============================================================================

/// Writes `last_beat = now` for one channel at a fixed interval
pub struct HeartbeatPublisher {
    channel: HeartbeatChannel,
    heartbeats: SharedHeartbeatRepository,
    interval: Duration,
}

impl HeartbeatPublisher {
    pub fn new(
        channel: HeartbeatChannel,
        heartbeats: SharedHeartbeatRepository,
        config: &LivenessConfig,
    ) -> Self {
        Self {
            channel,
            heartbeats,
            interval: Duration::from_secs(config.publish_interval_secs),
        }
    }

    /// Record a single beat
    pub fn publish(&self, now: DateTime<Utc>) -> Result<()> {
        self.heartbeats.beat(self.channel, now)?;
        debug!(channel = %self.channel, "Heartbeat published");
        Ok(())
    }

    /// Publish until shutdown. Failed writes are retried on the next tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            channel = %self.channel,
            interval_secs = self.interval.as_secs(),
            "Heartbeat publisher started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.publish(Utc::now()) {
                        warn!(channel = %self.channel, error = %e, "Heartbeat publish failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(channel = %self.channel, "Heartbeat publisher stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

// ============================================================================
// Watchdog
// ============================================================================

/// Result of one watchdog check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Healthy { age: chrono::Duration },
    Stale { age: chrono::Duration },
    Missing,
}

/// Reads one channel and recovers it once the beat is older than the timeout
pub struct Watchdog<R> {
    channel: HeartbeatChannel,
    heartbeats: SharedHeartbeatRepository,
    recovery: R,
    timeout: chrono::Duration,
    interval: Duration,
}

impl<R: RecoveryAction + 'static> Watchdog<R> {
    pub fn new(
        channel: HeartbeatChannel,
        heartbeats: SharedHeartbeatRepository,
        recovery: R,
        config: &LivenessConfig,
    ) -> Self {
        Self {
            channel,
            heartbeats,
            recovery,
            timeout: chrono::Duration::seconds(config.timeout_secs as i64),
            interval: Duration::from_secs(config.check_interval_secs),
        }
    }

    pub fn channel(&self) -> HeartbeatChannel {
        self.channel
    }

    /// Check the channel once at `now`, recovering if the beat is stale.
    ///
    /// Stale means strictly older than the timeout.
    pub fn check(&self, now: DateTime<Utc>) -> Result<Verdict> {
        let Some(record) = self.heartbeats.heartbeat(self.channel)? else {
            warn!(channel = %self.channel, "No heartbeat record found");
            return Ok(Verdict::Missing);
        };

        let age = now - record.last_beat;
        if age > self.timeout {
            warn!(
                channel = %self.channel,
                age_secs = age.num_seconds(),
                timeout_secs = self.timeout.num_seconds(),
                "Heartbeat timed out, running recovery"
            );
            self.recovery.recover(self.channel, age)?;
            return Ok(Verdict::Stale { age });
        }

        debug!(
            channel = %self.channel,
            age_secs = age.num_seconds(),
            "Heartbeat healthy"
        );
        Ok(Verdict::Healthy { age })
    }

    /// Check until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            channel = %self.channel,
            interval_secs = self.interval.as_secs(),
            timeout_secs = self.timeout.num_seconds(),
            "Watchdog started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check(Utc::now()) {
                        error!(channel = %self.channel, error = %e, "Watchdog check failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(channel = %self.channel, "Watchdog stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
