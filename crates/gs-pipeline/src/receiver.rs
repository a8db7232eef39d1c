//! Webhook Receiver
//!
//! Request-scoped entry point: resolves the configuration, verifies the
//! signature, and durably records the notification as a delivery audit row
//! plus one PENDING sync event. Exactly two synchronous writes; all
//! transformation and publishing is deferred to the scheduler.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info};

use gs_common::{SyncEvent, WebhookDelivery};
use gs_store::{ConfigProvider, StoreError, SyncEventRepository};

use crate::payload::extract_descriptor;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("Unknown configuration: {0}")]
    ConfigNotFound(String),

    #[error("Configuration is disabled: {0}")]
    ConfigDisabled(String),

    #[error("Webhook signature verification failed")]
    InvalidSignature,

    #[error("Request body is not valid JSON: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Acceptance receipt returned to the caller.
#[derive(Debug, Clone)]
pub struct AcceptedWebhook {
    pub sync_event_id: String,
    pub delivery_id: String,
}

pub struct WebhookReceiver {
    configs: Arc<dyn ConfigProvider>,
    store: Arc<dyn SyncEventRepository>,
}

impl WebhookReceiver {
    pub fn new(configs: Arc<dyn ConfigProvider>, store: Arc<dyn SyncEventRepository>) -> Self {
        Self { configs, store }
    }

    /// Accept one inbound notification.
    ///
    /// Validation failures (unknown/disabled config, bad signature, non-JSON
    /// body) are returned synchronously with no durable record. On success a
    /// delivery row and a PENDING event row exist and the event id is
    /// returned.
    pub async fn accept(
        &self,
        config_id: &str,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<AcceptedWebhook, ReceiverError> {
        let config = self
            .configs
            .get(config_id)
            .await?
            .ok_or_else(|| ReceiverError::ConfigNotFound(config_id.to_string()))?;

        if !config.enabled {
            return Err(ReceiverError::ConfigDisabled(config_id.to_string()));
        }

        if let (Some(signature), Some(secret)) = (signature, config.webhook_secret.as_deref()) {
            verify_signature(secret, raw_body, signature)?;
        }

        let payload: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|e| ReceiverError::InvalidPayload(e.to_string()))?;

        let descriptor = extract_descriptor(config.source, &payload);

        let delivery = WebhookDelivery::new(
            &config.tenant_id,
            config.source,
            &descriptor.event_type,
            payload.clone(),
            signature.map(str::to_string),
        );
        self.store.insert_delivery(&delivery).await?;

        let mut event = SyncEvent::new(
            &descriptor.event_type,
            config.source,
            &config.tenant_id,
            payload,
        )
        .with_occurred_at(descriptor.occurred_at);
        if let Some(external_id) = descriptor.external_id {
            event = event.with_external_id(external_id);
        }
        self.store.insert_event(&event).await?;

        self.store.attach_event(&delivery.id, &event.id).await?;

        metrics::counter!("receiver.webhooks.accepted_total").increment(1);
        info!(
            event_id = %event.id,
            delivery_id = %delivery.id,
            source = %config.source,
            event_type = %descriptor.event_type,
            "Accepted webhook"
        );

        Ok(AcceptedWebhook {
            sync_event_id: event.id,
            delivery_id: delivery.id,
        })
    }
}

/// Verify an HMAC-SHA256 hex signature over the raw body. Accepts the bare
/// digest or the `sha256=<digest>` header convention.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> Result<(), ReceiverError> {
    let supplied = signature.strip_prefix("sha256=").unwrap_or(signature);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ReceiverError::InvalidSignature)?;
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    if !constant_time_compare(&expected, supplied) {
        debug!("Webhook signature mismatch");
        return Err(ReceiverError::InvalidSignature);
    }
    Ok(())
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Compute the hex signature for a body; used by tests and local tooling.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
