//! Manual retry
//!
//! Operator-initiated re-queue of a FAILED or DEAD_LETTER event. The reset
//! clears the retry budget and the stored error, so the event gets a fresh
//! set of attempts; the DLQ snapshot columns are cleared with it. Requests
//! against events in any other status are rejected, which also makes repeated
//! retry clicks harmless.

use std::sync::Arc;

use gs_common::SyncEventStatus;
use gs_store::{RequeueOutcome, StoreError, SyncEventRepository};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("No sync event with id {0}")]
    NotFound(String),

    #[error("Event is in {0} and cannot be retried")]
    NotInFailedState(SyncEventStatus),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ManualRetryService {
    store: Arc<dyn SyncEventRepository>,
}

impl ManualRetryService {
    pub fn new(store: Arc<dyn SyncEventRepository>) -> Self {
        Self { store }
    }

    /// Re-queue one event. On success the event is PENDING with
    /// retry_count 0 and will be picked up by the next scheduler tick.
    pub async fn retry(&self, event_id: &str) -> Result<(), RetryError> {
        match self.store.requeue(event_id).await? {
            RequeueOutcome::Requeued => {
                metrics::counter!("retry.manual_total").increment(1);
                info!(event_id, "Event manually re-queued");
                Ok(())
            }
            RequeueOutcome::NotFound => Err(RetryError::NotFound(event_id.to_string())),
            RequeueOutcome::NotInFailedState(status) => {
                Err(RetryError::NotInFailedState(status))
            }
        }
    }
}
