//! GraphSync Ingestion Pipeline
//!
//! The at-least-once processing pipeline between inbound webhooks and the
//! downstream knowledge-graph channel:
//! - WebhookReceiver: validates and durably records one event per notification
//! - EventKind / processor: classifies payloads and builds idempotent messages
//! - GraphPublisher: delivers messages downstream
//! - FailureHandler: the retry/dead-letter state machine
//! - SyncScheduler: the periodic, non-reentrant lease-and-process tick
//! - StaleRecovery: reclaims events orphaned in PROCESSING by a crash
//! - ManualRetryService: operator re-queue of failed/dead-lettered events

pub mod failure;
pub mod payload;
pub mod processor;
pub mod publisher;
pub mod receiver;
pub mod retry;
pub mod scheduler;
pub mod stale;

pub use failure::{FailureDisposition, FailureHandler};
pub use payload::{EventDescriptor, EventKind};
pub use processor::{build_messages, ProcessOutcome};
pub use publisher::{GraphPublisher, HttpGraphPublisher, PublishError};
pub use receiver::{sign_body, AcceptedWebhook, ReceiverError, WebhookReceiver};
pub use retry::{ManualRetryService, RetryError};
pub use scheduler::{SchedulerConfig, SyncScheduler, TickStats};
pub use stale::{StaleRecovery, StaleRecoveryConfig};
