//! SQLite Sync Event Repository Implementation
//!
//! Implements SyncEventRepository on sqlx/SQLite. Timestamps are stored as
//! epoch milliseconds, statuses as integer codes. The lease is a per-row
//! conditional UPDATE; SQLite's row-level atomicity is what makes the claim
//! safe under concurrent schedulers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gs_common::{DeliveryStatus, SourceSystem, SyncEvent, SyncEventStatus, WebhookDelivery};
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::{debug, info};

use crate::repository::{
    ClaimCandidate, DeadLetterSnapshot, EventFilter, RequeueOutcome, SyncEventRepository,
};
use crate::{Result, StoreError};

const EVENT_COLUMNS: &str = "id, event_type, source, tenant_id, external_id, changes, status, \
     retry_count, error_message, not_before, dlq_payload, dlq_error, dlq_failed_at, dlq_attempts, \
     occurred_at, created_at, updated_at";

pub struct SqliteSyncEventRepository {
    pool: SqlitePool,
}

impl SqliteSyncEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn millis(ts: DateTime<Utc>) -> i64 {
        ts.timestamp_millis()
    }

    fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
        DateTime::from_timestamp_millis(ms).ok_or(StoreError::InvalidTimestamp(ms))
    }

    fn parse_event_row(row: &sqlx::sqlite::SqliteRow) -> Result<SyncEvent> {
        let source_str: String = row.get("source");
        let source = SourceSystem::parse(&source_str)
            .ok_or_else(|| StoreError::InvalidSource(source_str.clone()))?;

        let changes: String = row.get("changes");
        let dlq_payload: Option<String> = row.try_get("dlq_payload").ok().flatten();

        let not_before: Option<i64> = row.try_get("not_before").ok().flatten();
        let dlq_failed_at: Option<i64> = row.try_get("dlq_failed_at").ok().flatten();
        let updated_at: Option<i64> = row.try_get("updated_at").ok().flatten();

        Ok(SyncEvent {
            id: row.get("id"),
            event_type: row.get("event_type"),
            source,
            tenant_id: row.get("tenant_id"),
            external_id: row.try_get("external_id").ok().flatten(),
            changes: serde_json::from_str(&changes)?,
            status: SyncEventStatus::from_code(row.get("status")),
            retry_count: row.get("retry_count"),
            error_message: row.try_get("error_message").ok().flatten(),
            not_before: not_before.map(Self::from_millis).transpose()?,
            dlq_payload: dlq_payload.map(|p| serde_json::from_str(&p)).transpose()?,
            dlq_error: row.try_get("dlq_error").ok().flatten(),
            dlq_failed_at: dlq_failed_at.map(Self::from_millis).transpose()?,
            dlq_attempts: row.try_get("dlq_attempts").ok().flatten(),
            occurred_at: Self::from_millis(row.get("occurred_at"))?,
            created_at: Self::from_millis(row.get("created_at"))?,
            updated_at: updated_at.map(Self::from_millis).transpose()?,
        })
    }

    fn parse_delivery_row(row: &sqlx::sqlite::SqliteRow) -> Result<WebhookDelivery> {
        let source_str: String = row.get("source");
        let source = SourceSystem::parse(&source_str)
            .ok_or_else(|| StoreError::InvalidSource(source_str.clone()))?;

        let payload: String = row.get("payload");
        let processed_at: Option<i64> = row.try_get("processed_at").ok().flatten();

        Ok(WebhookDelivery {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            source,
            event_type: row.get("event_type"),
            payload: serde_json::from_str(&payload)?,
            signature: row.try_get("signature").ok().flatten(),
            status: DeliveryStatus::from_code(row.get("status")),
            sync_event_id: row.try_get("sync_event_id").ok().flatten(),
            received_at: Self::from_millis(row.get("received_at"))?,
            processed_at: processed_at.map(Self::from_millis).transpose()?,
            error_message: row.try_get("error_message").ok().flatten(),
        })
    }
}

#[async_trait]
impl SyncEventRepository for SqliteSyncEventRepository {
    async fn insert_event(&self, event: &SyncEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_events \
             (id, event_type, source, tenant_id, external_id, changes, status, retry_count, \
              error_message, not_before, occurred_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(event.source.as_str())
        .bind(&event.tenant_id)
        .bind(&event.external_id)
        .bind(serde_json::to_string(&event.changes)?)
        .bind(event.status.code())
        .bind(event.retry_count)
        .bind(&event.error_message)
        .bind(event.not_before.map(Self::millis))
        .bind(Self::millis(event.occurred_at))
        .bind(Self::millis(event.created_at))
        .execute(&self.pool)
        .await?;

        debug!(event_id = %event.id, source = %event.source, "Inserted sync event");
        Ok(())
    }

    async fn find_event(&self, id: &str) -> Result<Option<SyncEvent>> {
        let query = format!("SELECT {} FROM sync_events WHERE id = ?", EVENT_COLUMNS);
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::parse_event_row).transpose()
    }

    async fn fetch_actionable(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<SyncEvent>> {
        let query = format!(
            "SELECT {} FROM sync_events \
             WHERE status IN (?, ?) AND (not_before IS NULL OR not_before <= ?) \
             ORDER BY occurred_at ASC LIMIT ?",
            EVENT_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(SyncEventStatus::Pending.code())
            .bind(SyncEventStatus::Retrying.code())
            .bind(Self::millis(now))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            events.push(Self::parse_event_row(row)?);
        }

        debug!(count = events.len(), "Fetched actionable events");
        Ok(events)
    }

    async fn claim(&self, candidates: &[ClaimCandidate]) -> Result<Vec<String>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now().timestamp_millis();
        let mut claimed = Vec::with_capacity(candidates.len());

        // One conditional UPDATE per row. rows_affected is the claim truth:
        // a row already flipped by another claimant no longer matches the
        // expected status and is skipped.
        for candidate in candidates {
            let result = sqlx::query(
                "UPDATE sync_events SET status = ?, updated_at = ? \
                 WHERE id = ? AND status = ?",
            )
            .bind(SyncEventStatus::Processing.code())
            .bind(now)
            .bind(&candidate.id)
            .bind(candidate.expected_status.code())
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                claimed.push(candidate.id.clone());
            }
        }

        debug!(requested = candidates.len(), claimed = claimed.len(), "Claimed events");
        Ok(claimed)
    }

    async fn mark_completed(&self, id: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "UPDATE sync_events SET status = ?, error_message = NULL, not_before = NULL, \
             updated_at = ? WHERE id = ?",
        )
        .bind(SyncEventStatus::Completed.code())
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        debug!(event_id = %id, "Marked event COMPLETED");
        Ok(())
    }

    async fn mark_retrying(
        &self,
        id: &str,
        retry_count: i32,
        error: &str,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "UPDATE sync_events SET status = ?, retry_count = ?, error_message = ?, \
             not_before = ?, updated_at = ? WHERE id = ?",
        )
        .bind(SyncEventStatus::Retrying.code())
        .bind(retry_count)
        .bind(error)
        .bind(not_before.map(Self::millis))
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        debug!(event_id = %id, retry_count, "Marked event RETRYING");
        Ok(())
    }

    async fn mark_dead_letter(&self, id: &str, snapshot: DeadLetterSnapshot) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "UPDATE sync_events SET status = ?, error_message = ?, not_before = NULL, \
             dlq_payload = ?, dlq_error = ?, dlq_failed_at = ?, dlq_attempts = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(SyncEventStatus::DeadLetter.code())
        .bind(&snapshot.error)
        .bind(serde_json::to_string(&snapshot.payload)?)
        .bind(&snapshot.error)
        .bind(Self::millis(snapshot.failed_at))
        .bind(snapshot.attempts)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        info!(event_id = %id, attempts = snapshot.attempts, "Dead-lettered event");
        Ok(())
    }

    async fn requeue(&self, id: &str) -> Result<RequeueOutcome> {
        let now = Utc::now().timestamp_millis();

        // Conditional on the requeueable states so a repeated call on an
        // already-PENDING event is rejected, not silently repeated.
        let result = sqlx::query(
            "UPDATE sync_events SET status = ?, retry_count = 0, error_message = NULL, \
             not_before = NULL, dlq_payload = NULL, dlq_error = NULL, dlq_failed_at = NULL, \
             dlq_attempts = NULL, updated_at = ? WHERE id = ? AND status IN (?, ?)",
        )
        .bind(SyncEventStatus::Pending.code())
        .bind(now)
        .bind(id)
        .bind(SyncEventStatus::Failed.code())
        .bind(SyncEventStatus::DeadLetter.code())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            info!(event_id = %id, "Requeued event to PENDING");
            return Ok(RequeueOutcome::Requeued);
        }

        match self.find_event(id).await? {
            None => Ok(RequeueOutcome::NotFound),
            Some(event) => Ok(RequeueOutcome::NotInFailedState(event.status)),
        }
    }

    async fn recover_stale(&self, stuck_for: Duration, limit: u32) -> Result<u64> {
        let cutoff = Utc::now().timestamp_millis() - stuck_for.as_millis() as i64;
        let now = Utc::now().timestamp_millis();

        let result = sqlx::query(
            "UPDATE sync_events SET status = ?, updated_at = ? \
             WHERE id IN ( \
                 SELECT id FROM sync_events WHERE status = ? AND updated_at < ? \
                 ORDER BY updated_at ASC LIMIT ? \
             )",
        )
        .bind(SyncEventStatus::Pending.code())
        .bind(now)
        .bind(SyncEventStatus::Processing.code())
        .bind(cutoff)
        .bind(limit)
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            info!(count, "Reset stale PROCESSING events to PENDING");
        }
        Ok(count)
    }

    async fn list_events(&self, filter: EventFilter) -> Result<Vec<SyncEvent>> {
        let mut query = format!("SELECT {} FROM sync_events WHERE 1 = 1", EVENT_COLUMNS);
        if filter.status.is_some() {
            query.push_str(" AND status = ?");
        }
        if filter.tenant_id.is_some() {
            query.push_str(" AND tenant_id = ?");
        }
        query.push_str(" ORDER BY created_at DESC LIMIT ?");

        let limit = if filter.limit == 0 { 100 } else { filter.limit };
        let mut q = sqlx::query(&query);
        if let Some(status) = filter.status {
            q = q.bind(status.code());
        }
        if let Some(tenant) = &filter.tenant_id {
            q = q.bind(tenant);
        }
        let rows = q.bind(limit).fetch_all(&self.pool).await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            events.push(Self::parse_event_row(row)?);
        }
        Ok(events)
    }

    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<()> {
        sqlx::query(
            "INSERT INTO webhook_deliveries \
             (id, tenant_id, source, event_type, payload, signature, status, sync_event_id, \
              received_at, processed_at, error_message) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&delivery.id)
        .bind(&delivery.tenant_id)
        .bind(delivery.source.as_str())
        .bind(&delivery.event_type)
        .bind(serde_json::to_string(&delivery.payload)?)
        .bind(&delivery.signature)
        .bind(delivery.status.code())
        .bind(&delivery.sync_event_id)
        .bind(Self::millis(delivery.received_at))
        .bind(delivery.processed_at.map(Self::millis))
        .bind(&delivery.error_message)
        .execute(&self.pool)
        .await?;

        debug!(delivery_id = %delivery.id, "Inserted webhook delivery");
        Ok(())
    }

    async fn find_delivery(&self, id: &str) -> Result<Option<WebhookDelivery>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, source, event_type, payload, signature, status, \
             sync_event_id, received_at, processed_at, error_message \
             FROM webhook_deliveries WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::parse_delivery_row).transpose()
    }

    async fn attach_event(&self, delivery_id: &str, event_id: &str) -> Result<()> {
        sqlx::query("UPDATE webhook_deliveries SET sync_event_id = ?, status = ? WHERE id = ?")
            .bind(event_id)
            .bind(DeliveryStatus::Processing.code())
            .bind(delivery_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_initial_outcome(
        &self,
        event_id: &str,
        status: DeliveryStatus,
        error: Option<String>,
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();

        // Conditioned on the processing state: only the first terminal
        // outcome lands on the audit row, retries leave it untouched.
        sqlx::query(
            "UPDATE webhook_deliveries SET status = ?, processed_at = ?, error_message = ? \
             WHERE sync_event_id = ? AND status = ?",
        )
        .bind(status.code())
        .bind(now)
        .bind(&error)
        .bind(event_id)
        .bind(DeliveryStatus::Processing.code())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_events (
                id TEXT PRIMARY KEY,
                event_type TEXT NOT NULL,
                source TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                external_id TEXT,
                changes TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                not_before INTEGER,
                dlq_payload TEXT,
                dlq_error TEXT,
                dlq_failed_at INTEGER,
                dlq_attempts INTEGER,
                occurred_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_events_status ON sync_events(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sync_events_occurred_at ON sync_events(occurred_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sync_events_tenant ON sync_events(tenant_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS webhook_deliveries (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                source TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                signature TEXT,
                status INTEGER NOT NULL DEFAULT 0,
                sync_event_id TEXT,
                received_at INTEGER NOT NULL,
                processed_at INTEGER,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_deliveries_event ON webhook_deliveries(sync_event_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_configs (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                source TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                webhook_secret TEXT,
                retry_limit INTEGER,
                retry_delay_secs INTEGER,
                graph_base_url TEXT,
                graph_api_key TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Initialized SQLite sync schema");
        Ok(())
    }
}
