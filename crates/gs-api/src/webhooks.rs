//! Webhook ingestion endpoint

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use bytes::Bytes;
use serde::Serialize;

use crate::error::ApiError;
use crate::AppState;

/// Signature header conventions accepted on inbound webhooks, in order of
/// preference.
const SIGNATURE_HEADERS: [&str; 2] = ["x-hub-signature-256", "x-webhook-signature"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAccepted {
    pub success: bool,
    pub sync_event_id: String,
}

/// Accept one webhook notification for a configuration. Returns 202 on
/// acceptance; processing happens asynchronously on the scheduler.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(config_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(axum::http::StatusCode, Json<WebhookAccepted>), ApiError> {
    let signature = SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok());

    let accepted = state.receiver.accept(&config_id, &body, signature).await?;

    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(WebhookAccepted {
            success: true,
            sync_event_id: accepted.sync_event_id,
        }),
    ))
}
