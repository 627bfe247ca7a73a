//! Scheduled trigger processing.
//!
//! The dispatcher drains the change ledger whenever a local write wakes it and
//! otherwise on a fixed poll interval, which also picks up rows appended by
//! other instances and rows whose earlier delivery failed. Processed rows are
//! pruned on a slower interval.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shelfmate_common::{AppResult, config::TriggerConfig};
use shelfmate_core::services::{DrainReport, TriggerDispatcher, TriggerWaker};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between ledger polls (default: 500 milliseconds).
    pub poll_interval: Duration,
    /// Interval between prune runs (default: 1 hour).
    pub prune_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            prune_interval: Duration::from_secs(3600),
        }
    }
}

impl From<&TriggerConfig> for SchedulerConfig {
    fn from(config: &TriggerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            ..Self::default()
        }
    }
}

/// Work the scheduler drives.
#[async_trait]
pub trait TriggerExecutor: Send + Sync {
    /// Process pending ledger rows.
    async fn drain(&self) -> AppResult<DrainReport>;

    /// Delete old processed ledger rows.
    async fn prune(&self) -> AppResult<u64>;
}

#[async_trait]
impl TriggerExecutor for TriggerDispatcher {
    async fn drain(&self) -> AppResult<DrainReport> {
        Self::drain(self).await
    }

    async fn prune(&self) -> AppResult<u64> {
        Self::prune(self).await
    }
}

/// Run the drain and prune loops until `shutdown` flips to `true`.
pub fn run_scheduler<E: TriggerExecutor + 'static>(
    config: SchedulerConfig,
    executor: Arc<E>,
    waker: TriggerWaker,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let drain_executor = executor.clone();
    let mut drain_shutdown = shutdown.clone();
    let poll_interval = config.poll_interval;

    let drain_task = tokio::spawn(async move {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = waker.notified() => {}
                _ = drain_shutdown.changed() => break,
            }
            if let Err(e) = drain_executor.drain().await {
                tracing::error!(error = %e, "Failed to drain change ledger");
            }
        }
        tracing::info!("Trigger dispatcher stopped");
    });

    let mut prune_shutdown = shutdown;
    let prune_interval = config.prune_interval;

    let prune_task = tokio::spawn(async move {
        let mut ticker = interval(prune_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = prune_shutdown.changed() => break,
            }
            if let Err(e) = executor.prune().await {
                tracing::error!(error = %e, "Failed to prune change ledger");
            }
        }
    });

    vec![drain_task, prune_task]
}
