//! GraphSync HTTP API
//!
//! The outer surface of the service:
//! - POST /api/webhooks/{config_id}: webhook ingestion
//! - GET  /api/sync-events, GET /api/sync-events/{id}: operational inspection
//! - POST /api/sync-events/{id}/retry: manual re-queue
//! - GET  /health: liveness probe

use axum::{
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use gs_pipeline::{ManualRetryService, WebhookReceiver};
use gs_store::SyncEventRepository;

pub mod error;
pub mod events;
pub mod webhooks;

pub use error::{ApiError, ErrorResponse};

#[derive(Clone)]
pub struct AppState {
    pub receiver: Arc<WebhookReceiver>,
    pub retry: Arc<ManualRetryService>,
    pub store: Arc<dyn SyncEventRepository>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/webhooks/{config_id}", post(webhooks::receive_webhook))
        .route("/api/sync-events", get(events::list_events))
        .route("/api/sync-events/{id}", get(events::get_event))
        .route("/api/sync-events/{id}/retry", post(events::retry_event))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP",
        timestamp: Utc::now(),
    })
}
