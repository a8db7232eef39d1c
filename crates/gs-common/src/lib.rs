use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod logging;

// ============================================================================
// Source Systems
// ============================================================================

/// External collaboration tools that send us change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSystem {
    Jira,
    Confluence,
}

impl SourceSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSystem::Jira => "jira",
            SourceSystem::Confluence => "confluence",
        }
    }

    /// Parse from string, case-insensitive
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "jira" => Some(SourceSystem::Jira),
            "confluence" => Some(SourceSystem::Confluence),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Sync Event (the unit of work)
// ============================================================================

/// Sync event status codes.
/// Stored as integers in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEventStatus {
    /// Awaiting a scheduler claim (code: 0)
    Pending,
    /// Leased by a scheduler tick, work in flight (code: 1)
    Processing,
    /// All derived messages published (code: 2)
    Completed,
    /// Failed, eligible for re-claim (code: 3)
    Retrying,
    /// Marked failed by an operator or external tooling (code: 4)
    Failed,
    /// Retry budget exhausted; forensic snapshot preserved (code: 5)
    DeadLetter,
}

impl SyncEventStatus {
    /// Convert status to integer code for database storage
    pub fn code(&self) -> i32 {
        match self {
            SyncEventStatus::Pending => 0,
            SyncEventStatus::Processing => 1,
            SyncEventStatus::Completed => 2,
            SyncEventStatus::Retrying => 3,
            SyncEventStatus::Failed => 4,
            SyncEventStatus::DeadLetter => 5,
        }
    }

    /// Create status from integer code, defaulting to Pending for unknown codes
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => SyncEventStatus::Pending,
            1 => SyncEventStatus::Processing,
            2 => SyncEventStatus::Completed,
            3 => SyncEventStatus::Retrying,
            4 => SyncEventStatus::Failed,
            5 => SyncEventStatus::DeadLetter,
            _ => SyncEventStatus::Pending,
        }
    }

    /// Terminal states never re-enter the pipeline without a manual retry
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncEventStatus::Completed | SyncEventStatus::Failed | SyncEventStatus::DeadLetter
        )
    }

    /// States the scheduler may claim
    pub fn is_actionable(&self) -> bool {
        matches!(self, SyncEventStatus::Pending | SyncEventStatus::Retrying)
    }

    /// States the manual retry endpoint accepts
    pub fn is_requeueable(&self) -> bool {
        matches!(self, SyncEventStatus::Failed | SyncEventStatus::DeadLetter)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(SyncEventStatus::Pending),
            "PROCESSING" => Some(SyncEventStatus::Processing),
            "COMPLETED" => Some(SyncEventStatus::Completed),
            "RETRYING" => Some(SyncEventStatus::Retrying),
            "FAILED" => Some(SyncEventStatus::Failed),
            "DEAD_LETTER" => Some(SyncEventStatus::DeadLetter),
            _ => None,
        }
    }
}

impl Default for SyncEventStatus {
    fn default() -> Self {
        SyncEventStatus::Pending
    }
}

impl std::fmt::Display for SyncEventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncEventStatus::Pending => "PENDING",
            SyncEventStatus::Processing => "PROCESSING",
            SyncEventStatus::Completed => "COMPLETED",
            SyncEventStatus::Retrying => "RETRYING",
            SyncEventStatus::Failed => "FAILED",
            SyncEventStatus::DeadLetter => "DEAD_LETTER",
        };
        f.write_str(s)
    }
}

/// The durable unit of work: one detected external change awaiting (or having
/// undergone) transformation and publishing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub id: String,
    /// Source-specific event kind (e.g. "jira:issue_created")
    pub event_type: String,
    pub source: SourceSystem,
    pub tenant_id: String,
    /// The source system's native id/key for the subject (e.g. "KAN-1")
    pub external_id: Option<String>,
    /// Raw or lightly-normalized notification body
    pub changes: serde_json::Value,
    pub status: SyncEventStatus,
    pub retry_count: i32,
    pub error_message: Option<String>,
    /// Earliest time a RETRYING event may be re-claimed (backoff gate)
    pub not_before: Option<DateTime<Utc>>,
    // Dead-letter snapshot, populated only on transition into DEAD_LETTER
    pub dlq_payload: Option<serde_json::Value>,
    pub dlq_error: Option<String>,
    pub dlq_failed_at: Option<DateTime<Utc>>,
    pub dlq_attempts: Option<i32>,
    /// Logical occurrence time reported by the source, distinct from ingestion time
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SyncEvent {
    /// Create a new PENDING event with a generated id
    pub fn new(
        event_type: impl Into<String>,
        source: SourceSystem,
        tenant_id: impl Into<String>,
        changes: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            source,
            tenant_id: tenant_id.into(),
            external_id: None,
            changes,
            status: SyncEventStatus::Pending,
            retry_count: 0,
            error_message: None,
            not_before: None,
            dlq_payload: None,
            dlq_error: None,
            dlq_failed_at: None,
            dlq_attempts: None,
            occurred_at: Utc::now(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    pub fn with_occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }
}

// ============================================================================
// Webhook Delivery (immutable audit record)
// ============================================================================

/// Status of one inbound webhook call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Passed config/signature checks (code: 0)
    Validated,
    /// Linked sync event created, awaiting its first processing attempt (code: 1)
    Processing,
    /// First processing attempt completed (code: 2)
    Completed,
    /// First processing attempt failed (code: 3)
    Failed,
}

impl DeliveryStatus {
    pub fn code(&self) -> i32 {
        match self {
            DeliveryStatus::Validated => 0,
            DeliveryStatus::Processing => 1,
            DeliveryStatus::Completed => 2,
            DeliveryStatus::Failed => 3,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => DeliveryStatus::Processing,
            2 => DeliveryStatus::Completed,
            3 => DeliveryStatus::Failed,
            _ => DeliveryStatus::Validated,
        }
    }
}

/// Audit record of one raw inbound notification call. Written by the receiver,
/// updated when the linked event is created and once more when the initial
/// processing attempt reaches a terminal outcome. Never updated for retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDelivery {
    pub id: String,
    pub tenant_id: String,
    pub source: SourceSystem,
    pub event_type: String,
    /// Raw request body
    pub payload: serde_json::Value,
    pub signature: Option<String>,
    pub status: DeliveryStatus,
    /// The sync event this delivery produced, if validation got that far
    pub sync_event_id: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl WebhookDelivery {
    pub fn new(
        tenant_id: impl Into<String>,
        source: SourceSystem,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        signature: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            source,
            event_type: event_type.into(),
            payload,
            signature,
            status: DeliveryStatus::Validated,
            sync_event_id: None,
            received_at: Utc::now(),
            processed_at: None,
            error_message: None,
        }
    }
}

// ============================================================================
// Sync Configuration (external collaborator, read-only to this core)
// ============================================================================

/// Per-tenant webhook/sync configuration. This core never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub id: String,
    pub tenant_id: String,
    pub source: SourceSystem,
    pub enabled: bool,
    /// Shared secret for HMAC signature verification (None = unsigned webhooks accepted)
    pub webhook_secret: Option<String>,
    /// Max retry attempts before dead-lettering (default 3 if unset)
    pub retry_limit: Option<i32>,
    /// Backoff applied between retries, in seconds (0/unset = next tick)
    pub retry_delay_secs: Option<u64>,
    /// Downstream knowledge-graph connection parameters
    pub graph_base_url: Option<String>,
    pub graph_api_key: Option<String>,
}

pub const DEFAULT_RETRY_LIMIT: i32 = 3;

impl SyncConfig {
    pub fn retry_limit(&self) -> i32 {
        self.retry_limit.unwrap_or(DEFAULT_RETRY_LIMIT)
    }

    pub fn retry_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.retry_delay_secs.unwrap_or(0))
    }
}

// ============================================================================
// Downstream Message Envelope
// ============================================================================

/// Message kinds understood by the knowledge-graph consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GraphMessageType {
    CreateEntity,
    LinkEntities,
}

/// Envelope sent to the downstream knowledge-graph channel.
///
/// `message_id` is deterministic over `(sourceEventId, role)` so at-least-once
/// redelivery produces identical ids and the consumer can deduplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMessage {
    pub message_type: GraphMessageType,
    pub payload: serde_json::Value,
    pub message_id: String,
}

impl GraphMessage {
    pub fn create_entity(event_id: &str, role: &str, payload: serde_json::Value) -> Self {
        Self {
            message_type: GraphMessageType::CreateEntity,
            payload,
            message_id: format!("{}-{}", event_id, role),
        }
    }

    pub fn link_entities(event_id: &str, payload: serde_json::Value) -> Self {
        Self {
            message_type: GraphMessageType::LinkEntities,
            payload,
            message_id: format!("{}-link", event_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip() {
        for status in [
            SyncEventStatus::Pending,
            SyncEventStatus::Processing,
            SyncEventStatus::Completed,
            SyncEventStatus::Retrying,
            SyncEventStatus::Failed,
            SyncEventStatus::DeadLetter,
        ] {
            assert_eq!(SyncEventStatus::from_code(status.code()), status);
        }
    }

    #[test]
    fn unknown_status_code_defaults_to_pending() {
        assert_eq!(SyncEventStatus::from_code(42), SyncEventStatus::Pending);
    }

    #[test]
    fn terminal_and_actionable_are_disjoint() {
        for code in 0..=5 {
            let status = SyncEventStatus::from_code(code);
            assert!(!(status.is_terminal() && status.is_actionable()));
        }
    }

    #[test]
    fn requeueable_states() {
        assert!(SyncEventStatus::Failed.is_requeueable());
        assert!(SyncEventStatus::DeadLetter.is_requeueable());
        assert!(!SyncEventStatus::Pending.is_requeueable());
        assert!(!SyncEventStatus::Completed.is_requeueable());
    }

    #[test]
    fn message_ids_are_deterministic() {
        let a = GraphMessage::create_entity("ev-1", "issue", serde_json::json!({}));
        let b = GraphMessage::create_entity("ev-1", "issue", serde_json::json!({}));
        assert_eq!(a.message_id, b.message_id);
        assert_eq!(a.message_id, "ev-1-issue");

        let link = GraphMessage::link_entities("ev-1", serde_json::json!({}));
        assert_eq!(link.message_id, "ev-1-link");
    }

    #[test]
    fn source_system_parse() {
        assert_eq!(SourceSystem::parse("JIRA"), Some(SourceSystem::Jira));
        assert_eq!(SourceSystem::parse("confluence"), Some(SourceSystem::Confluence));
        assert_eq!(SourceSystem::parse("github"), None);
    }

    #[test]
    fn retry_limit_defaults() {
        let config = SyncConfig {
            id: "cfg-1".to_string(),
            tenant_id: "t-1".to_string(),
            source: SourceSystem::Jira,
            enabled: true,
            webhook_secret: None,
            retry_limit: None,
            retry_delay_secs: None,
            graph_base_url: None,
            graph_api_key: None,
        };
        assert_eq!(config.retry_limit(), 3);
        assert_eq!(config.retry_delay(), std::time::Duration::ZERO);
    }
}
