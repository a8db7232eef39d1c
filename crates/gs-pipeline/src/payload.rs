//! Payload classification
//!
//! Inbound notification bodies are opaque JSON. Rather than guessing at an
//! untyped blob downstream, each payload is classified once into a tagged
//! EventKind keyed by (source, event type), with an explicit Unknown fallback
//! that always routes to the vacuous-success path.

use chrono::{DateTime, Utc};
use gs_common::SourceSystem;
use serde_json::Value;

/// The change kinds this pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    IssueCreated,
    IssueUpdated,
    IssueDeleted,
    PageCreated,
    PageUpdated,
    PageDeleted,
    CommentCreated,
    CommentUpdated,
    CommentDeleted,
    /// Anything not recognized; never guessed at, always skipped
    Unknown,
}

impl EventKind {
    /// Classify by (source, event type). Event type strings may arrive with
    /// or without a source prefix ("jira:issue_created" vs "issue_created").
    pub fn classify(source: SourceSystem, event_type: &str) -> Self {
        let kind = event_type
            .rsplit(':')
            .next()
            .unwrap_or(event_type)
            .to_lowercase();

        match (source, kind.as_str()) {
            (SourceSystem::Jira, "issue_created") => EventKind::IssueCreated,
            (SourceSystem::Jira, "issue_updated") => EventKind::IssueUpdated,
            (SourceSystem::Jira, "issue_deleted") => EventKind::IssueDeleted,
            (SourceSystem::Confluence, "page_created") => EventKind::PageCreated,
            (SourceSystem::Confluence, "page_updated") => EventKind::PageUpdated,
            (SourceSystem::Confluence, "page_removed" | "page_deleted") => EventKind::PageDeleted,
            (_, "comment_created") => EventKind::CommentCreated,
            (_, "comment_updated") => EventKind::CommentUpdated,
            (_, "comment_removed" | "comment_deleted") => EventKind::CommentDeleted,
            _ => EventKind::Unknown,
        }
    }

    pub fn is_issue(&self) -> bool {
        matches!(
            self,
            EventKind::IssueCreated | EventKind::IssueUpdated | EventKind::IssueDeleted
        )
    }

    pub fn is_page(&self) -> bool {
        matches!(
            self,
            EventKind::PageCreated | EventKind::PageUpdated | EventKind::PageDeleted
        )
    }

    pub fn is_comment(&self) -> bool {
        matches!(
            self,
            EventKind::CommentCreated | EventKind::CommentUpdated | EventKind::CommentDeleted
        )
    }
}

/// Minimal descriptor the receiver pulls out of a raw payload. Deliberately
/// shallow; full field mapping happens at processing time.
#[derive(Debug, Clone)]
pub struct EventDescriptor {
    pub event_type: String,
    pub external_id: Option<String>,
    pub actor: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Best-effort extraction of the event descriptor from a raw notification.
pub fn extract_descriptor(source: SourceSystem, payload: &Value) -> EventDescriptor {
    let event_type = payload
        .get("webhookEvent")
        .or_else(|| payload.get("eventType"))
        .or_else(|| payload.get("event"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let external_id = match source {
        SourceSystem::Jira => str_at(payload, &["issue", "key"])
            .or_else(|| str_at(payload, &["comment", "id"])),
        SourceSystem::Confluence => str_at(payload, &["page", "id"])
            .or_else(|| num_as_string(payload, &["page", "id"]))
            .or_else(|| str_at(payload, &["comment", "id"])),
    };

    let actor = str_at(payload, &["user", "accountId"])
        .or_else(|| str_at(payload, &["issue", "fields", "reporter", "accountId"]))
        .or_else(|| str_at(payload, &["page", "author", "accountId"]));

    let occurred_at = payload
        .get("timestamp")
        .and_then(Value::as_i64)
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    EventDescriptor {
        event_type,
        external_id,
        actor,
        occurred_at,
    }
}

/// Walk a path of object keys, returning the string leaf if present.
pub(crate) fn str_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str().map(str::to_string)
}

pub(crate) fn num_as_string(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current.as_i64().map(|n| n.to_string())
}
