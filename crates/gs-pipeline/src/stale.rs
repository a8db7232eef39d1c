//! Stale event recovery
//!
//! An instance that crashes mid-batch leaves its claimed events stuck in
//! PROCESSING with no owner. This poller periodically resets events that have
//! sat in PROCESSING beyond a threshold back to PENDING so the next tick can
//! pick them up. The threshold must comfortably exceed the per-event timeout
//! or live work gets reclaimed out from under a healthy instance.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use gs_store::{StoreError, SyncEventRepository};

#[derive(Debug, Clone)]
pub struct StaleRecoveryConfig {
    pub enabled: bool,
    pub check_interval: Duration,
    /// How long an event may sit in PROCESSING before it counts as orphaned
    pub stuck_threshold: Duration,
    pub batch_size: u32,
}

impl Default for StaleRecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: Duration::from_secs(60),
            stuck_threshold: Duration::from_secs(300),
            batch_size: 100,
        }
    }
}

#[derive(Clone)]
pub struct StaleRecovery {
    config: StaleRecoveryConfig,
    store: Arc<dyn SyncEventRepository>,
}

impl StaleRecovery {
    pub fn new(config: StaleRecoveryConfig, store: Arc<dyn SyncEventRepository>) -> Self {
        Self { config, store }
    }

    /// Run the recovery loop until the task is dropped or shutdown fires.
    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("Stale event recovery is disabled");
            return;
        }

        info!(
            check_interval_secs = self.config.check_interval.as_secs(),
            stuck_threshold_secs = self.config.stuck_threshold.as_secs(),
            "Starting stale event recovery"
        );

        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.recover_once().await {
                        error!(error = %e, "Stale event recovery pass failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Stale event recovery shutting down");
                    break;
                }
            }
        }
    }

    /// One recovery pass; public for deterministic tests.
    pub async fn recover_once(&self) -> Result<u64, StoreError> {
        let recovered = self
            .store
            .recover_stale(self.config.stuck_threshold, self.config.batch_size)
            .await?;

        metrics::counter!("scheduler.stale_events.recovered_total").increment(recovered);
        if recovered > 0 {
            info!(count = recovered, "Recovered stale PROCESSING events");
        } else {
            debug!("No stale events to recover");
        }
        Ok(recovered)
    }
}
