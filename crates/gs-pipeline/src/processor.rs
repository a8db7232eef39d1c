//! Event Processor
//!
//! Pure transformation of a claimed sync event into an ordered list of
//! knowledge-graph messages. No I/O; deterministic for a given payload, so a
//! redelivered event always yields the same message ids.
//!
//! Payloads missing the minimum fields for their kind are skipped, not
//! failed: the event completes with zero messages. A malformed payload will
//! never get better on retry, so it does not consume the retry budget; the
//! scheduler logs each skip so the discard is at least observable.

use gs_common::{GraphMessage, SourceSystem, SyncEvent};
use serde_json::{json, Value};

use crate::payload::{str_at, EventKind};

/// Result of processing one event.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Ordered messages to publish: primary entity, optional actor entity,
    /// optional link relating them.
    Publish(Vec<GraphMessage>),
    /// Vacuous success: unknown kind or missing required fields.
    Skip { reason: String },
}

/// Build the downstream messages for a claimed event.
pub fn build_messages(event: &SyncEvent) -> ProcessOutcome {
    let kind = EventKind::classify(event.source, &event.event_type);

    if kind.is_issue() {
        build_issue_messages(event)
    } else if kind.is_page() {
        build_page_messages(event)
    } else if kind.is_comment() {
        build_comment_messages(event)
    } else {
        ProcessOutcome::Skip {
            reason: format!("unrecognized event kind: {}", event.event_type),
        }
    }
}

fn build_issue_messages(event: &SyncEvent) -> ProcessOutcome {
    let changes = &event.changes;
    let Some(key) = str_at(changes, &["issue", "key"]) else {
        return ProcessOutcome::Skip {
            reason: "issue payload missing issue.key".to_string(),
        };
    };
    let Some(summary) = str_at(changes, &["issue", "fields", "summary"]) else {
        return ProcessOutcome::Skip {
            reason: "issue payload missing issue.fields.summary".to_string(),
        };
    };

    let mut attributes = serde_json::Map::new();
    if let Some(status) = str_at(changes, &["issue", "fields", "status", "name"]) {
        attributes.insert("status".to_string(), Value::String(status));
    }
    if let Some(issue_type) = str_at(changes, &["issue", "fields", "issuetype", "name"]) {
        attributes.insert("issueType".to_string(), Value::String(issue_type));
    }
    if let Some(priority) = str_at(changes, &["issue", "fields", "priority", "name"]) {
        attributes.insert("priority".to_string(), Value::String(priority));
    }

    let mut messages = vec![GraphMessage::create_entity(
        &event.id,
        "issue",
        json!({
            "externalId": key,
            "entityType": "ISSUE",
            "name": summary,
            "source": event.source.as_str(),
            "tenantId": event.tenant_id,
            "attributes": Value::Object(attributes),
        }),
    )];

    let actor = str_at(changes, &["issue", "fields", "reporter", "accountId"])
        .or_else(|| str_at(changes, &["user", "accountId"]));

    if let Some(account_id) = actor {
        let display_name = str_at(changes, &["issue", "fields", "reporter", "displayName"])
            .or_else(|| str_at(changes, &["user", "displayName"]))
            .unwrap_or_else(|| account_id.clone());

        messages.push(user_message(event, &account_id, &display_name));
        messages.push(GraphMessage::link_entities(
            &event.id,
            json!({
                "fromExternalId": key,
                "toExternalId": account_id,
                "relation": "REPORTED_BY",
                "tenantId": event.tenant_id,
            }),
        ));
    }

    ProcessOutcome::Publish(messages)
}

fn build_page_messages(event: &SyncEvent) -> ProcessOutcome {
    let changes = &event.changes;
    let Some(page_id) = str_at(changes, &["page", "id"])
        .or_else(|| crate::payload::num_as_string(changes, &["page", "id"]))
    else {
        return ProcessOutcome::Skip {
            reason: "page payload missing page.id".to_string(),
        };
    };
    let Some(title) = str_at(changes, &["page", "title"]) else {
        return ProcessOutcome::Skip {
            reason: "page payload missing page.title".to_string(),
        };
    };

    let mut attributes = serde_json::Map::new();
    if let Some(space) = str_at(changes, &["page", "spaceKey"]) {
        attributes.insert("spaceKey".to_string(), Value::String(space));
    }

    let mut messages = vec![GraphMessage::create_entity(
        &event.id,
        "page",
        json!({
            "externalId": page_id,
            "entityType": "PAGE",
            "name": title,
            "source": event.source.as_str(),
            "tenantId": event.tenant_id,
            "attributes": Value::Object(attributes),
        }),
    )];

    let actor = str_at(changes, &["page", "author", "accountId"])
        .or_else(|| str_at(changes, &["user", "accountId"]));

    if let Some(account_id) = actor {
        let display_name = str_at(changes, &["page", "author", "displayName"])
            .or_else(|| str_at(changes, &["user", "displayName"]))
            .unwrap_or_else(|| account_id.clone());

        messages.push(user_message(event, &account_id, &display_name));
        messages.push(GraphMessage::link_entities(
            &event.id,
            json!({
                "fromExternalId": page_id,
                "toExternalId": account_id,
                "relation": "AUTHORED_BY",
                "tenantId": event.tenant_id,
            }),
        ));
    }

    ProcessOutcome::Publish(messages)
}

fn build_comment_messages(event: &SyncEvent) -> ProcessOutcome {
    let changes = &event.changes;
    let Some(comment_id) = str_at(changes, &["comment", "id"])
        .or_else(|| crate::payload::num_as_string(changes, &["comment", "id"]))
    else {
        return ProcessOutcome::Skip {
            reason: "comment payload missing comment.id".to_string(),
        };
    };

    // A comment is meaningless without its container
    let container = match event.source {
        SourceSystem::Jira => str_at(changes, &["issue", "key"]),
        SourceSystem::Confluence => str_at(changes, &["page", "id"])
            .or_else(|| crate::payload::num_as_string(changes, &["page", "id"])),
    };
    let Some(container_id) = container else {
        return ProcessOutcome::Skip {
            reason: "comment payload missing container reference".to_string(),
        };
    };

    let body = str_at(changes, &["comment", "body"]).unwrap_or_default();
    let name = if body.is_empty() {
        format!("Comment {}", comment_id)
    } else {
        body.chars().take(80).collect()
    };

    let mut messages = vec![GraphMessage::create_entity(
        &event.id,
        "comment",
        json!({
            "externalId": comment_id,
            "entityType": "COMMENT",
            "name": name,
            "source": event.source.as_str(),
            "tenantId": event.tenant_id,
            "attributes": {"containerExternalId": container_id},
        }),
    )];

    if let Some(account_id) = str_at(changes, &["comment", "author", "accountId"]) {
        let display_name = str_at(changes, &["comment", "author", "displayName"])
            .unwrap_or_else(|| account_id.clone());

        messages.push(user_message(event, &account_id, &display_name));
        messages.push(GraphMessage::link_entities(
            &event.id,
            json!({
                "fromExternalId": comment_id,
                "toExternalId": account_id,
                "relation": "AUTHORED_BY",
                "tenantId": event.tenant_id,
            }),
        ));
    }

    ProcessOutcome::Publish(messages)
}

fn user_message(event: &SyncEvent, account_id: &str, display_name: &str) -> GraphMessage {
    GraphMessage::create_entity(
        &event.id,
        "user",
        json!({
            "externalId": account_id,
            "entityType": "USER",
            "name": display_name,
            "source": event.source.as_str(),
            "tenantId": event.tenant_id,
        }),
    )
}
