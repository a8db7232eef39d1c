//! Failure Handler
//!
//! Applies the retry/dead-letter state machine on a processing exception:
//! bump the retry count; within budget the event goes back to RETRYING
//! (gated by the configured backoff delay), past the budget it is parked in
//! DEAD_LETTER with a forensic snapshot of the payload and error.

use chrono::Utc;
use gs_common::{SyncConfig, SyncEvent, DEFAULT_RETRY_LIMIT};
use gs_store::{DeadLetterSnapshot, StoreError, SyncEventRepository};
use std::sync::Arc;
use tracing::{info, warn};

/// What the handler decided for a failed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Back to RETRYING; eligible again once `not_before` (if any) passes
    Retrying { attempt: i32 },
    /// Retry budget exhausted; snapshot persisted
    DeadLettered { attempts: i32 },
}

pub struct FailureHandler {
    store: Arc<dyn SyncEventRepository>,
}

impl FailureHandler {
    pub fn new(store: Arc<dyn SyncEventRepository>) -> Self {
        Self { store }
    }

    /// Apply the transition rule for one failed event. `config` is the
    /// owning configuration if one could be resolved; without it the
    /// defaults apply (retry limit 3, no backoff).
    pub async fn handle(
        &self,
        event: &SyncEvent,
        error: &str,
        config: Option<&SyncConfig>,
    ) -> Result<FailureDisposition, StoreError> {
        let retry_limit = config.map(SyncConfig::retry_limit).unwrap_or(DEFAULT_RETRY_LIMIT);
        let retry_delay = config.map(SyncConfig::retry_delay).unwrap_or_default();

        let new_retry_count = event.retry_count + 1;

        if new_retry_count > retry_limit {
            let snapshot = DeadLetterSnapshot {
                payload: event.changes.clone(),
                error: error.to_string(),
                failed_at: Utc::now(),
                attempts: new_retry_count,
            };
            self.store.mark_dead_letter(&event.id, snapshot).await?;

            metrics::counter!("pipeline.events.dead_lettered_total").increment(1);
            warn!(
                event_id = %event.id,
                attempts = new_retry_count,
                retry_limit,
                error,
                "Event exhausted retry budget, dead-lettered"
            );
            return Ok(FailureDisposition::DeadLettered {
                attempts: new_retry_count,
            });
        }

        let not_before = if retry_delay.is_zero() {
            None
        } else {
            Some(Utc::now() + chrono::Duration::from_std(retry_delay).unwrap_or_default())
        };

        self.store
            .mark_retrying(&event.id, new_retry_count, error, not_before)
            .await?;

        metrics::counter!("pipeline.events.retries_total").increment(1);
        info!(
            event_id = %event.id,
            attempt = new_retry_count,
            retry_limit,
            error,
            "Event scheduled for retry"
        );
        Ok(FailureDisposition::Retrying {
            attempt: new_retry_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gs_common::{SourceSystem, SyncEventStatus};
    use gs_store::SqliteSyncEventRepository;
    use serde_json::json;

    async fn store() -> Arc<SqliteSyncEventRepository> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = SqliteSyncEventRepository::new(pool);
        repo.init_schema().await.unwrap();
        Arc::new(repo)
    }

    fn config(retry_limit: i32, retry_delay_secs: u64) -> SyncConfig {
        SyncConfig {
            id: "cfg-1".to_string(),
            tenant_id: "t-1".to_string(),
            source: SourceSystem::Jira,
            enabled: true,
            webhook_secret: None,
            retry_limit: Some(retry_limit),
            retry_delay_secs: Some(retry_delay_secs),
            graph_base_url: None,
            graph_api_key: None,
        }
    }

    #[tokio::test]
    async fn failures_within_budget_go_to_retrying() {
        let store = store().await;
        let handler = FailureHandler::new(store.clone());

        let event = SyncEvent::new("jira:issue_created", SourceSystem::Jira, "t-1", json!({}));
        store.insert_event(&event).await.unwrap();

        let disposition = handler
            .handle(&event, "downstream unavailable", Some(&config(3, 0)))
            .await
            .unwrap();
        assert_eq!(disposition, FailureDisposition::Retrying { attempt: 1 });

        let stored = store.find_event(&event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SyncEventStatus::Retrying);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.error_message.as_deref(), Some("downstream unavailable"));
        assert!(stored.not_before.is_none());
    }

    #[tokio::test]
    async fn fourth_failure_with_limit_three_dead_letters() {
        // retry limit 3: three failures retry, the fourth dead-letters
        let store = store().await;
        let handler = FailureHandler::new(store.clone());
        let cfg = config(3, 0);

        let event = SyncEvent::new("jira:issue_created", SourceSystem::Jira, "t-1", json!({"k": 1}));
        store.insert_event(&event).await.unwrap();

        let mut current = event.clone();
        for attempt in 1..=3 {
            let disposition = handler.handle(&current, "boom", Some(&cfg)).await.unwrap();
            assert_eq!(disposition, FailureDisposition::Retrying { attempt });
            current = store.find_event(&event.id).await.unwrap().unwrap();
            assert_eq!(current.retry_count, attempt);
        }

        let disposition = handler.handle(&current, "boom", Some(&cfg)).await.unwrap();
        assert_eq!(disposition, FailureDisposition::DeadLettered { attempts: 4 });

        let stored = store.find_event(&event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SyncEventStatus::DeadLetter);
        assert_eq!(stored.dlq_attempts, Some(4));
        assert_eq!(stored.dlq_error.as_deref(), Some("boom"));
        assert_eq!(stored.dlq_payload, Some(json!({"k": 1})));
    }

    #[tokio::test]
    async fn retry_delay_sets_not_before_gate() {
        let store = store().await;
        let handler = FailureHandler::new(store.clone());

        let event = SyncEvent::new("jira:issue_created", SourceSystem::Jira, "t-1", json!({}));
        store.insert_event(&event).await.unwrap();

        let before = Utc::now();
        handler
            .handle(&event, "boom", Some(&config(3, 60)))
            .await
            .unwrap();

        let stored = store.find_event(&event.id).await.unwrap().unwrap();
        let not_before = stored.not_before.expect("not_before should be set");
        assert!(not_before >= before + chrono::Duration::seconds(59));
    }

    #[tokio::test]
    async fn missing_config_uses_default_limit() {
        let store = store().await;
        let handler = FailureHandler::new(store.clone());

        let mut event = SyncEvent::new("jira:issue_created", SourceSystem::Jira, "t-1", json!({}));
        event.retry_count = DEFAULT_RETRY_LIMIT;
        store.insert_event(&event).await.unwrap();

        let disposition = handler.handle(&event, "boom", None).await.unwrap();
        assert_eq!(
            disposition,
            FailureDisposition::DeadLettered {
                attempts: DEFAULT_RETRY_LIMIT + 1
            }
        );
    }
}
