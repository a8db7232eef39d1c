//! Sync Scheduler
//!
//! The single driver of event processing: a periodic tick that fetches
//! actionable events, leases them through the conditional claim, and walks
//! each claimed event through transform, publish, and terminal transition.
//! Ticks never overlap; a tick that runs long causes the next one to be
//! skipped rather than queued behind it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, error, info, trace, warn};

use gs_common::{DeliveryStatus, SyncConfig, SyncEvent};
use gs_store::{ClaimCandidate, ConfigProvider, StoreError, SyncEventRepository};

use crate::failure::{FailureDisposition, FailureHandler};
use crate::processor::{build_messages, ProcessOutcome};
use crate::publisher::GraphPublisher;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick_interval: Duration,
    pub batch_size: u32,
    /// Wall-clock budget for one event's transform-and-publish
    pub event_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval: Duration::from_secs(5),
            batch_size: 50,
            event_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters for one tick, surfaced for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub fetched: usize,
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

#[derive(Clone)]
pub struct SyncScheduler {
    config: SchedulerConfig,
    store: Arc<dyn SyncEventRepository>,
    configs: Arc<dyn ConfigProvider>,
    publisher: Arc<dyn GraphPublisher>,
    failure: Arc<FailureHandler>,
    running: Arc<RwLock<bool>>,
    in_flight: Arc<AtomicBool>,
}

impl SyncScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn SyncEventRepository>,
        configs: Arc<dyn ConfigProvider>,
        publisher: Arc<dyn GraphPublisher>,
    ) -> Self {
        let failure = Arc::new(FailureHandler::new(store.clone()));
        Self {
            config,
            store,
            configs,
            publisher,
            failure,
            running: Arc::new(RwLock::new(false)),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the periodic tick loop. Idempotent: a second call while running
    /// is a no-op.
    pub async fn start(&self) {
        if !self.config.enabled {
            info!("Sync scheduler is disabled");
            return;
        }

        let mut running = self.running.write().await;
        if *running {
            warn!("Scheduler already running");
            return;
        }
        *running = true;
        drop(running);

        info!(
            tick_interval_ms = self.config.tick_interval.as_millis(),
            batch_size = self.config.batch_size,
            "Starting sync scheduler"
        );

        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut interval = interval(scheduler.config.tick_interval);
            loop {
                interval.tick().await;
                if !*scheduler.running.read().await {
                    break;
                }
                scheduler.tick().await;
            }
        });
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("Sync scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// One guarded tick. If the previous tick is still in flight this one is
    /// dropped, keeping at most a single tick active per instance.
    async fn tick(&self) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Previous tick still in flight, skipping");
            metrics::counter!("scheduler.ticks.skipped_total").increment(1);
            return;
        }

        let result = self.tick_once().await;
        self.in_flight.store(false, Ordering::Release);

        match result {
            Ok(stats) if stats.claimed > 0 => {
                info!(
                    claimed = stats.claimed,
                    completed = stats.completed,
                    retried = stats.retried,
                    dead_lettered = stats.dead_lettered,
                    "Tick finished"
                );
            }
            Ok(_) => trace!("Tick finished, nothing to do"),
            Err(e) => error!(error = %e, "Tick failed"),
        }
    }

    /// Fetch, claim, and process one batch. Public so tests and tooling can
    /// drive the scheduler deterministically without the timer loop.
    pub async fn tick_once(&self) -> Result<TickStats, StoreError> {
        let mut stats = TickStats::default();

        let actionable = self
            .store
            .fetch_actionable(self.config.batch_size, Utc::now())
            .await?;
        stats.fetched = actionable.len();
        if actionable.is_empty() {
            return Ok(stats);
        }

        let candidates: Vec<ClaimCandidate> =
            actionable.iter().map(ClaimCandidate::of).collect();
        let claimed_ids = self.store.claim(&candidates).await?;
        stats.claimed = claimed_ids.len();

        metrics::gauge!("scheduler.batch.fetched").set(stats.fetched as f64);
        metrics::counter!("scheduler.events.claimed_total").increment(stats.claimed as u64);

        for event in actionable {
            if !claimed_ids.contains(&event.id) {
                // Lost the lease race to another instance
                continue;
            }
            match self.process_claimed(&event).await {
                Ok(EventOutcome::Completed) => stats.completed += 1,
                Ok(EventOutcome::Retried) => stats.retried += 1,
                Ok(EventOutcome::DeadLettered) => stats.dead_lettered += 1,
                Err(e) => {
                    // Store failure while recording an outcome; the event
                    // stays in PROCESSING and stale recovery reclaims it.
                    error!(event_id = %event.id, error = %e, "Failed to record event outcome");
                }
            }
        }
        Ok(stats)
    }

    /// Process one claimed event through to a terminal transition. All
    /// processing errors are absorbed into the retry/dead-letter path so one
    /// bad event never aborts the rest of the batch.
    async fn process_claimed(&self, event: &SyncEvent) -> Result<EventOutcome, StoreError> {
        let attempt =
            tokio::time::timeout(self.config.event_timeout, self.attempt(event)).await;

        let error = match attempt {
            Ok(Ok(())) => {
                self.store.mark_completed(&event.id).await?;
                self.store
                    .record_initial_outcome(&event.id, DeliveryStatus::Completed, None)
                    .await?;
                metrics::counter!("scheduler.events.completed_total").increment(1);
                debug!(event_id = %event.id, "Event completed");
                return Ok(EventOutcome::Completed);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "Processing timed out after {}s",
                self.config.event_timeout.as_secs()
            ),
        };

        let config = self.resolve_config(event).await;
        let disposition = self
            .failure
            .handle(event, &error, config.as_ref())
            .await?;
        self.store
            .record_initial_outcome(&event.id, DeliveryStatus::Failed, Some(error))
            .await?;

        Ok(match disposition {
            FailureDisposition::Retrying { .. } => EventOutcome::Retried,
            FailureDisposition::DeadLettered { .. } => EventOutcome::DeadLettered,
        })
    }

    /// One transform-and-publish attempt.
    async fn attempt(&self, event: &SyncEvent) -> Result<(), crate::publisher::PublishError> {
        match build_messages(event) {
            ProcessOutcome::Publish(messages) => {
                for message in &messages {
                    self.publisher.publish(message).await?;
                }
                Ok(())
            }
            ProcessOutcome::Skip { reason } => {
                // Vacuous success: nothing to publish, event still completes
                warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    reason = %reason,
                    "Skipping event payload"
                );
                metrics::counter!("scheduler.events.skipped_total").increment(1);
                Ok(())
            }
        }
    }

    async fn resolve_config(&self, event: &SyncEvent) -> Option<SyncConfig> {
        match self.configs.find_for(&event.tenant_id, event.source).await {
            Ok(config) => config,
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Could not resolve sync config, using defaults");
                None
            }
        }
    }
}

enum EventOutcome {
    Completed,
    Retried,
    DeadLettered,
}
