//! Downstream Publisher
//!
//! Sends knowledge-graph messages to the downstream consumer in order.
//! Delivery is at-least-once: a failure part-way through a message group
//! propagates to the failure handler and the whole group is re-sent on
//! retry. Deterministic message ids make the resend safe to deduplicate.

use async_trait::async_trait;
use gs_common::GraphMessage;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Downstream rejected message ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Boundary to the knowledge-graph message channel. Send one message and
/// await acknowledgment or raise.
#[async_trait]
pub trait GraphPublisher: Send + Sync {
    async fn publish(&self, message: &GraphMessage) -> Result<(), PublishError>;
}

/// HTTP publisher posting envelopes to the knowledge-graph service API.
/// Authenticates with both a Bearer token and an x-api-key header, matching
/// what the service accepts.
pub struct HttpGraphPublisher {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGraphPublisher {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key).header("x-api-key", key),
            None => req,
        }
    }

    /// Probe the downstream health endpoint.
    pub async fn health(&self) -> Result<(), PublishError> {
        let url = format!("{}/api/v1/health", self.base_url);
        let response = self.authed(self.client.get(&url)).send().await?;
        if !response.status().is_success() {
            return Err(PublishError::Rejected {
                status: response.status().as_u16(),
                message: "health check failed".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl GraphPublisher for HttpGraphPublisher {
    async fn publish(&self, message: &GraphMessage) -> Result<(), PublishError> {
        let url = format!("{}/api/v1/messages", self.base_url);

        let response = self
            .authed(self.client.post(&url))
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            metrics::counter!("publisher.messages.rejected_total").increment(1);
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }

        metrics::counter!("publisher.messages.sent_total").increment(1);
        debug!(message_id = %message.message_id, "Published graph message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn publishes_envelope_with_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/messages"))
            .and(header("x-api-key", "key-1"))
            .and(header("authorization", "Bearer key-1"))
            .and(body_partial_json(json!({
                "messageType": "CREATE_ENTITY",
                "messageId": "ev-1-issue"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let publisher = HttpGraphPublisher::new(server.uri(), Some("key-1".to_string()));
        let message = GraphMessage::create_entity("ev-1", "issue", json!({"externalId": "KAN-1"}));

        publisher.publish(&message).await.unwrap();
    }

    #[tokio::test]
    async fn non_success_status_raises_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/messages"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let publisher = HttpGraphPublisher::new(server.uri(), None);
        let message = GraphMessage::create_entity("ev-1", "issue", json!({}));

        match publisher.publish(&message).await {
            Err(PublishError::Rejected { status, message }) => {
                assert_eq!(status, 503);
                assert_eq!(message, "unavailable");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn health_probe_hits_health_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/health"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let publisher = HttpGraphPublisher::new(server.uri(), None);
        publisher.health().await.unwrap();
    }
}
