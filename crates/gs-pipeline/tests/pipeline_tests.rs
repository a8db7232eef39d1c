//! End-to-end pipeline tests: webhook acceptance through scheduler ticks to
//! terminal event states, against a real SQLite store and a scripted
//! publisher.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use gs_common::{GraphMessage, SourceSystem, SyncConfig, SyncEventStatus};
use gs_pipeline::publisher::PublishError;
use gs_pipeline::{
    sign_body, GraphPublisher, ManualRetryService, SchedulerConfig, SyncScheduler, WebhookReceiver,
};
use gs_store::{InMemoryConfigProvider, SqliteSyncEventRepository, SyncEventRepository};

/// Publisher that fails its first `failures` calls, then records every
/// accepted message id.
struct ScriptedPublisher {
    failures: AtomicUsize,
    sent: Mutex<Vec<String>>,
}

impl ScriptedPublisher {
    fn new(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent_ids(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl GraphPublisher for ScriptedPublisher {
    async fn publish(&self, message: &GraphMessage) -> Result<(), PublishError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PublishError::Rejected {
                status: 503,
                message: "graph service unavailable".to_string(),
            });
        }
        self.sent.lock().unwrap().push(message.message_id.clone());
        Ok(())
    }
}

struct Harness {
    store: Arc<SqliteSyncEventRepository>,
    publisher: Arc<ScriptedPublisher>,
    receiver: WebhookReceiver,
    scheduler: SyncScheduler,
    retry: ManualRetryService,
}

async fn harness(publish_failures: usize) -> Harness {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = Arc::new(SqliteSyncEventRepository::new(pool));
    store.init_schema().await.unwrap();

    let configs = InMemoryConfigProvider::new();
    configs
        .insert(SyncConfig {
            id: "cfg-jira".to_string(),
            tenant_id: "t-1".to_string(),
            source: SourceSystem::Jira,
            enabled: true,
            webhook_secret: Some("s3cret".to_string()),
            retry_limit: Some(3),
            retry_delay_secs: Some(0),
            graph_base_url: None,
            graph_api_key: None,
        })
        .await;
    let configs = Arc::new(configs);

    let publisher = Arc::new(ScriptedPublisher::new(publish_failures));
    let receiver = WebhookReceiver::new(configs.clone(), store.clone());
    let scheduler = SyncScheduler::new(
        SchedulerConfig::default(),
        store.clone(),
        configs,
        publisher.clone(),
    );
    let retry = ManualRetryService::new(store.clone());

    Harness {
        store,
        publisher,
        receiver,
        scheduler,
        retry,
    }
}

fn signed(body: &serde_json::Value) -> (Vec<u8>, String) {
    let raw = serde_json::to_vec(body).unwrap();
    let signature = format!("sha256={}", sign_body("s3cret", &raw));
    (raw, signature)
}

#[tokio::test]
async fn simple_issue_webhook_flows_to_completed() {
    // Valid signed webhook, no reporter, single entity message
    let h = harness(0).await;

    let (body, signature) = signed(&json!({
        "webhookEvent": "jira:issue_created",
        "timestamp": 1714000000000i64,
        "issue": {"key": "KAN-1", "fields": {"summary": "Fix login"}}
    }));
    let accepted = h
        .receiver
        .accept("cfg-jira", &body, Some(&signature))
        .await
        .unwrap();

    let stats = h.scheduler.tick_once().await.unwrap();
    assert_eq!(stats.completed, 1);

    let event = h
        .store
        .find_event(&accepted.sync_event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.status, SyncEventStatus::Completed);
    assert_eq!(
        h.publisher.sent_ids(),
        vec![format!("{}-issue", accepted.sync_event_id)]
    );
}

#[tokio::test]
async fn issue_with_reporter_publishes_three_messages_in_order() {
    let h = harness(0).await;

    let (body, signature) = signed(&json!({
        "webhookEvent": "jira:issue_created",
        "issue": {"key": "KAN-2", "fields": {
            "summary": "Add SSO",
            "reporter": {"accountId": "acc-7", "displayName": "Pat Vale"}
        }}
    }));
    let accepted = h
        .receiver
        .accept("cfg-jira", &body, Some(&signature))
        .await
        .unwrap();

    h.scheduler.tick_once().await.unwrap();

    let id = accepted.sync_event_id;
    assert_eq!(
        h.publisher.sent_ids(),
        vec![
            format!("{}-issue", id),
            format!("{}-user", id),
            format!("{}-link", id),
        ]
    );
}

#[tokio::test]
async fn exhausted_retries_dead_letter_with_forensic_snapshot() {
    // Retry limit 3; four failing attempts park the event
    let h = harness(usize::MAX).await;

    let (body, signature) = signed(&json!({
        "webhookEvent": "jira:issue_created",
        "issue": {"key": "KAN-3", "fields": {"summary": "Crashes on save"}}
    }));
    let accepted = h
        .receiver
        .accept("cfg-jira", &body, Some(&signature))
        .await
        .unwrap();

    for expected_retry in 1..=3 {
        let stats = h.scheduler.tick_once().await.unwrap();
        assert_eq!(stats.retried, 1);
        let event = h
            .store
            .find_event(&accepted.sync_event_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.status, SyncEventStatus::Retrying);
        assert_eq!(event.retry_count, expected_retry);
    }

    let stats = h.scheduler.tick_once().await.unwrap();
    assert_eq!(stats.dead_lettered, 1);

    let event = h
        .store
        .find_event(&accepted.sync_event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.status, SyncEventStatus::DeadLetter);
    assert_eq!(event.dlq_attempts, Some(4));
    assert!(event.dlq_error.is_some());
    assert!(event.dlq_failed_at.is_some());
    assert_eq!(event.dlq_payload.as_ref().unwrap()["issue"]["key"], "KAN-3");

    // Parked events are no longer actionable
    let stats = h.scheduler.tick_once().await.unwrap();
    assert_eq!(stats.fetched, 0);
}

#[tokio::test]
async fn manual_retry_gives_dead_lettered_event_a_fresh_run() {
    // Dead-letter, operator retry, downstream healthy again
    let h = harness(usize::MAX).await;

    let (body, signature) = signed(&json!({
        "webhookEvent": "jira:issue_created",
        "issue": {"key": "KAN-4", "fields": {"summary": "Broken link"}}
    }));
    let accepted = h
        .receiver
        .accept("cfg-jira", &body, Some(&signature))
        .await
        .unwrap();

    for _ in 0..4 {
        h.scheduler.tick_once().await.unwrap();
    }
    let event = h
        .store
        .find_event(&accepted.sync_event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.status, SyncEventStatus::DeadLetter);

    h.retry.retry(&accepted.sync_event_id).await.unwrap();
    let event = h
        .store
        .find_event(&accepted.sync_event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.status, SyncEventStatus::Pending);
    assert_eq!(event.retry_count, 0);

    // Heal the downstream and tick again
    h.publisher.failures.store(0, Ordering::SeqCst);
    let stats = h.scheduler.tick_once().await.unwrap();
    assert_eq!(stats.completed, 1);

    let event = h
        .store
        .find_event(&accepted.sync_event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.status, SyncEventStatus::Completed);
}

#[tokio::test]
async fn malformed_payload_completes_with_no_messages() {
    // Missing required fields is a vacuous success, not a retry
    let h = harness(0).await;

    let (body, signature) = signed(&json!({
        "webhookEvent": "jira:issue_created",
        "issue": {"key": "KAN-5", "fields": {}}
    }));
    let accepted = h
        .receiver
        .accept("cfg-jira", &body, Some(&signature))
        .await
        .unwrap();

    let stats = h.scheduler.tick_once().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert!(h.publisher.sent_ids().is_empty());

    let event = h
        .store
        .find_event(&accepted.sync_event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.status, SyncEventStatus::Completed);
    assert_eq!(event.retry_count, 0);
}

#[tokio::test]
async fn not_before_gate_defers_reclaim() {
    let h = harness(usize::MAX).await;

    // Configure a 1 hour backoff for this tenant
    let configs = InMemoryConfigProvider::new();
    configs
        .insert(SyncConfig {
            id: "cfg-slow".to_string(),
            tenant_id: "t-1".to_string(),
            source: SourceSystem::Jira,
            enabled: true,
            webhook_secret: None,
            retry_limit: Some(3),
            retry_delay_secs: Some(3600),
            graph_base_url: None,
            graph_api_key: None,
        })
        .await;
    let scheduler = SyncScheduler::new(
        SchedulerConfig::default(),
        h.store.clone(),
        Arc::new(configs),
        h.publisher.clone(),
    );

    let (body, _) = signed(&json!({
        "webhookEvent": "jira:issue_created",
        "issue": {"key": "KAN-6", "fields": {"summary": "Slow lane"}}
    }));
    let accepted = h.receiver.accept("cfg-jira", &body, None).await.unwrap();

    let stats = scheduler.tick_once().await.unwrap();
    assert_eq!(stats.retried, 1);

    let event = h
        .store
        .find_event(&accepted.sync_event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.status, SyncEventStatus::Retrying);
    assert!(event.not_before.unwrap() > Utc::now());

    // Gated event is invisible to the next tick
    let stats = scheduler.tick_once().await.unwrap();
    assert_eq!(stats.fetched, 0);
}

#[tokio::test]
async fn partial_publish_failure_resends_the_whole_group() {
    // First attempt delivers the issue message then fails on the user
    // message; the retry re-sends all three with the same ids.
    let h = harness(0).await;
    h.publisher.failures.store(0, Ordering::SeqCst);

    let (body, signature) = signed(&json!({
        "webhookEvent": "jira:issue_created",
        "issue": {"key": "KAN-7", "fields": {
            "summary": "Flaky downstream",
            "reporter": {"accountId": "acc-1"}
        }}
    }));
    let accepted = h
        .receiver
        .accept("cfg-jira", &body, Some(&signature))
        .await
        .unwrap();
    let id = accepted.sync_event_id;

    // Let the first message through, fail the second
    struct PartialPublisher {
        inner: Arc<ScriptedPublisher>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GraphPublisher for PartialPublisher {
        async fn publish(&self, message: &GraphMessage) -> Result<(), PublishError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(PublishError::Rejected {
                    status: 500,
                    message: "write conflict".to_string(),
                });
            }
            self.inner.publish(message).await
        }
    }

    let partial = Arc::new(PartialPublisher {
        inner: h.publisher.clone(),
        calls: AtomicUsize::new(0),
    });
    let configs = InMemoryConfigProvider::new();
    let scheduler = SyncScheduler::new(
        SchedulerConfig::default(),
        h.store.clone(),
        Arc::new(configs),
        partial,
    );

    let stats = scheduler.tick_once().await.unwrap();
    assert_eq!(stats.retried, 1);

    let stats = scheduler.tick_once().await.unwrap();
    assert_eq!(stats.completed, 1);

    assert_eq!(
        h.publisher.sent_ids(),
        vec![
            format!("{}-issue", id),
            format!("{}-issue", id),
            format!("{}-user", id),
            format!("{}-link", id),
        ]
    );
}
