//! Sync Event Repository Trait
//!
//! Defines the persistence interface for sync events and webhook deliveries.
//! The contract every implementation must honor:
//!
//! - `claim` is a conditional update: a row transitions to PROCESSING only if
//!   its current status still equals the expected status the caller observed.
//!   The returned id list (rows actually updated) is the true claimed set;
//!   callers must never assume the candidate list was fully claimed.
//! - `retry_count` only moves through `mark_retrying`/`mark_dead_letter` and
//!   `requeue`; nothing else touches it.
//! - Delivery rows are written once and updated at most twice (event link,
//!   then first-attempt outcome).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gs_common::{DeliveryStatus, SyncEvent, SyncEventStatus, WebhookDelivery};
use std::time::Duration;

use crate::Result;

/// One row the scheduler wants to lease, with the status it observed.
/// The claim conditions on both, so a concurrent claimant that already
/// flipped the row causes this claim to miss rather than double-lease.
#[derive(Debug, Clone)]
pub struct ClaimCandidate {
    pub id: String,
    pub expected_status: SyncEventStatus,
}

impl ClaimCandidate {
    pub fn of(event: &SyncEvent) -> Self {
        Self {
            id: event.id.clone(),
            expected_status: event.status,
        }
    }
}

/// Forensic snapshot persisted on transition into DEAD_LETTER.
#[derive(Debug, Clone)]
pub struct DeadLetterSnapshot {
    pub payload: serde_json::Value,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    pub attempts: i32,
}

/// Outcome of a manual requeue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// Event reset to PENDING with a cleared retry budget
    Requeued,
    /// No event with that id
    NotFound,
    /// Event exists but is not in FAILED or DEAD_LETTER
    NotInFailedState(SyncEventStatus),
}

/// Filter for operational event listing.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub status: Option<SyncEventStatus>,
    pub tenant_id: Option<String>,
    pub limit: u32,
}

#[async_trait]
pub trait SyncEventRepository: Send + Sync {
    // ========================================================================
    // Sync events
    // ========================================================================

    async fn insert_event(&self, event: &SyncEvent) -> Result<()>;

    async fn find_event(&self, id: &str) -> Result<Option<SyncEvent>>;

    /// Fetch up to `limit` events with status in {PENDING, RETRYING} whose
    /// `not_before` gate (if any) has passed, oldest occurrence first.
    async fn fetch_actionable(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<SyncEvent>>;

    /// Atomically lease the candidates: each row moves to PROCESSING only if
    /// its status still matches `expected_status`. Returns the ids actually
    /// claimed.
    async fn claim(&self, candidates: &[ClaimCandidate]) -> Result<Vec<String>>;

    async fn mark_completed(&self, id: &str) -> Result<()>;

    /// Record a transient failure: bump retry count, store the error, and
    /// optionally gate re-claim behind `not_before`.
    async fn mark_retrying(
        &self,
        id: &str,
        retry_count: i32,
        error: &str,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Terminal failure: persist the snapshot and park the event.
    async fn mark_dead_letter(&self, id: &str, snapshot: DeadLetterSnapshot) -> Result<()>;

    /// Operator-initiated re-queue of a FAILED or DEAD_LETTER event.
    /// Resets retry_count to 0 and clears the error and DLQ snapshot.
    async fn requeue(&self, id: &str) -> Result<RequeueOutcome>;

    /// Reclaim events stuck in PROCESSING for longer than `stuck_for`
    /// (crashed instance mid-batch). Returns the number reclaimed.
    async fn recover_stale(&self, stuck_for: Duration, limit: u32) -> Result<u64>;

    /// Operational listing by status and/or tenant.
    async fn list_events(&self, filter: EventFilter) -> Result<Vec<SyncEvent>>;

    // ========================================================================
    // Webhook deliveries (audit records)
    // ========================================================================

    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<()>;

    async fn find_delivery(&self, id: &str) -> Result<Option<WebhookDelivery>>;

    /// Link the delivery to the sync event it produced and mark it processing.
    async fn attach_event(&self, delivery_id: &str, event_id: &str) -> Result<()>;

    /// Record the terminal outcome of the event's *initial* processing
    /// attempt on its delivery. Conditioned on the delivery still being in
    /// the processing state, so retry outcomes never rewrite the audit row.
    async fn record_initial_outcome(
        &self,
        event_id: &str,
        status: DeliveryStatus,
        error: Option<String>,
    ) -> Result<()>;

    // ========================================================================
    // Schema management
    // ========================================================================

    /// Initialize schema (create tables if not exists)
    async fn init_schema(&self) -> Result<()>;
}
