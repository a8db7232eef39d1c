//! Sync event management endpoints
//!
//! Operational surface: inspect events, and manually re-queue failed or
//! dead-lettered ones.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};

use gs_common::{SyncEvent, SyncEventStatus};
use gs_store::EventFilter;

use crate::error::ApiError;
use crate::AppState;

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 500;

/// Sync event response DTO
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEventResponse {
    pub id: String,
    pub event_type: String,
    pub source: String,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub status: String,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dlq_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dlq_failed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dlq_attempts: Option<i32>,
    pub occurred_at: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl From<SyncEvent> for SyncEventResponse {
    fn from(e: SyncEvent) -> Self {
        Self {
            id: e.id,
            event_type: e.event_type,
            source: e.source.to_string(),
            tenant_id: e.tenant_id,
            external_id: e.external_id,
            status: e.status.to_string(),
            retry_count: e.retry_count,
            error_message: e.error_message,
            not_before: e.not_before.map(|t| t.to_rfc3339()),
            dlq_error: e.dlq_error,
            dlq_failed_at: e.dlq_failed_at.map(|t| t.to_rfc3339()),
            dlq_attempts: e.dlq_attempts,
            occurred_at: e.occurred_at.to_rfc3339(),
            created_at: e.created_at.to_rfc3339(),
            updated_at: e.updated_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Query parameters for the event list
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub status: Option<String>,
    pub tenant_id: Option<String>,
    pub limit: Option<u32>,
}

/// List sync events, most recently recorded first.
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<SyncEventResponse>>, ApiError> {
    let status = match query.status.as_deref() {
        Some(s) => Some(
            SyncEventStatus::parse(s)
                .ok_or_else(|| ApiError::Validation(format!("Unknown status: {}", s)))?,
        ),
        None => None,
    };

    let filter = EventFilter {
        status,
        tenant_id: query.tenant_id,
        limit: query
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .min(MAX_LIST_LIMIT),
    };

    let events = state.store.list_events(filter).await?;
    Ok(Json(events.into_iter().map(Into::into).collect()))
}

/// Get one sync event by id.
pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncEventResponse>, ApiError> {
    let event = state
        .store
        .find_event(&id)
        .await?
        .ok_or(ApiError::EventNotFound(id))?;
    Ok(Json(event.into()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryAccepted {
    pub success: bool,
    pub sync_event_id: String,
}

/// Manually re-queue a FAILED or DEAD_LETTER event.
pub async fn retry_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RetryAccepted>, ApiError> {
    state.retry.retry(&id).await?;
    Ok(Json(RetryAccepted {
        success: true,
        sync_event_id: id,
    }))
}
