//! Channel eviction policies
//!
//! Two independent mechanisms keep the history store bounded:
//! - [`CapacityPolicy`] runs synchronously after mutations and drops the
//!   least recently used channels once more than `max_channels` are tracked.
//! - [`IdleSweep`] runs on a fixed interval and drops every channel that has
//!   been idle for longer than the threshold.

use super::history::{ChannelId, HistoryStore};
use super::SharedMemory;
use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Allowed range for the sweep period
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(365 * 24 * 3600);

/// LRU ceiling on the number of tracked channels
#[derive(Debug, Clone, Copy)]
pub struct CapacityPolicy {
    max_channels: usize,
}

impl CapacityPolicy {
    pub fn new(max_channels: usize) -> Self {
        Self {
            max_channels: max_channels.max(1),
        }
    }

    /// Remove the oldest channels until at most `max_channels` remain.
    /// Returns the evicted channel ids, oldest first.
    pub fn enforce(&self, store: &mut HistoryStore) -> Vec<ChannelId> {
        let count = store.channel_count();
        if count <= self.max_channels {
            return Vec::new();
        }

        let evicted: Vec<ChannelId> = store
            .channels_by_age()
            .into_iter()
            .take(count - self.max_channels)
            .map(|(channel, _)| channel)
            .collect();

        for channel in &evicted {
            store.remove(*channel);
        }

        info!(
            evicted = ?evicted,
            remaining = store.channel_count(),
            "Evicted least recently used channels"
        );
        evicted
    }
}

/// Periodic removal of channels that have gone quiet
#[derive(Debug, Clone, Copy)]
pub struct IdleSweep {
    idle_threshold: Duration,
    interval: Duration,
}

impl IdleSweep {
    pub fn new(idle_threshold: Duration, interval: Duration) -> Self {
        Self {
            idle_threshold,
            interval,
        }
    }

    /// Remove every channel whose last use is older than the threshold at `now`.
    /// Channels exactly at the threshold are kept.
    pub fn sweep(&self, store: &mut HistoryStore, now: DateTime<Utc>) -> Vec<ChannelId> {
        // A threshold too large for chrono can never be exceeded
        let Ok(threshold) = TimeDelta::from_std(self.idle_threshold) else {
            return Vec::new();
        };

        let idle: Vec<ChannelId> = store
            .channels_by_age()
            .into_iter()
            .filter(|(_, used)| now.signed_duration_since(*used) > threshold)
            .map(|(channel, _)| channel)
            .collect();

        for channel in &idle {
            store.remove(*channel);
        }
        idle
    }

    /// One scheduled pass against the shared memory
    pub async fn run_once(&self, memory: &SharedMemory) -> Vec<ChannelId> {
        let mut memory = memory.lock().await;
        let swept = self.sweep(memory.store_mut(), Utc::now());
        if swept.is_empty() {
            debug!(
                tracked = memory.store().channel_count(),
                "Idle sweep found nothing to remove"
            );
        } else {
            info!(
                swept = ?swept,
                remaining = memory.store().channel_count(),
                "Removed idle channels"
            );
        }
        swept
    }

    /// Run the sweep forever on its own task.
    ///
    /// Nothing happens until `ready` turns `true`; the first pass runs one
    /// interval after that. A panicking pass is logged and the schedule
    /// carries on. If the readiness sender is dropped before signalling, the
    /// task exits without sweeping.
    pub fn spawn(self, memory: SharedMemory, ready: watch::Receiver<bool>) -> JoinHandle<()> {
        self.spawn_with(ready, move |sweep| {
            let memory = memory.clone();
            async move {
                sweep.run_once(&memory).await;
            }
        })
    }

    /// Schedule `pass` on the sweep interval once `ready` turns `true`
    fn spawn_with<F, Fut>(self, mut ready: watch::Receiver<bool>, mut pass: F) -> JoinHandle<()>
    where
        F: FnMut(IdleSweep) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            if ready.wait_for(|ready| *ready).await.is_err() {
                debug!("Readiness never signalled; idle sweep not started");
                return;
            }

            let period = self.interval.clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL);
            if period != self.interval {
                warn!(
                    requested_secs = self.interval.as_secs(),
                    used_secs = period.as_secs(),
                    "Idle sweep interval out of range, clamped"
                );
            }
            info!(
                interval_secs = period.as_secs(),
                idle_threshold_secs = self.idle_threshold.as_secs(),
                "Idle sweep scheduled"
            );

            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if let Err(panic) = AssertUnwindSafe(pass(self)).catch_unwind().await {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(%reason, "Idle sweep iteration failed");
                }
            }
        })
    }
}
